//! Inner thought — pre-turn guidance from the utility model.

use async_trait::async_trait;
use std::sync::Arc;

use kindred_core::error::ModelError;
use kindred_core::insight::{InnerThought, ResponseGuidance};
use kindred_core::message::{Message, Role};
use kindred_core::model::{extract_json, CompletionRequest, ModelClient};

const INSIGHT_SYSTEM: &str = "You are the inner voice of an AI companion. You think about how \
     to respond, never what to say verbatim.";

/// How many trailing messages the classification prompt quotes.
const RECENT_TAIL: usize = 6;

/// An `InnerThought` backed by the utility model.
pub struct ModelInsight {
    model: Arc<dyn ModelClient>,
    utility_model: String,
}

impl ModelInsight {
    pub fn new(model: Arc<dyn ModelClient>, utility_model: impl Into<String>) -> Self {
        Self {
            model,
            utility_model: utility_model.into(),
        }
    }
}

fn classify_prompt(user_text: &str, recent: &[Message]) -> String {
    let mut prompt = String::new();

    let tail = recent.iter().skip(recent.len().saturating_sub(RECENT_TAIL));
    let mut quoted = false;
    for message in tail {
        let who = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => continue,
        };
        if !quoted {
            prompt.push_str("Recent exchange:\n");
            quoted = true;
        }
        prompt.push_str(&format!("{who}: {}\n", message.content));
    }

    prompt.push_str(&format!(
        "\nThe user just said: {user_text}\n\n\
         How should the companion shape its reply? Respond with JSON only:\n\
         {{\"tone\": \"one short phrase\", \"directives\": [\"up to three concrete directives\"]}}"
    ));
    prompt
}

#[async_trait]
impl InnerThought for ModelInsight {
    async fn classify_context(
        &self,
        user_text: &str,
        recent: &[Message],
    ) -> std::result::Result<ResponseGuidance, ModelError> {
        let request = CompletionRequest::new(
            self.utility_model.clone(),
            vec![
                Message::system(INSIGHT_SYSTEM),
                Message::user(classify_prompt(user_text, recent)),
            ],
        )
        .with_temperature(0.3);

        let reply = self.model.complete(request).await?;

        let json = extract_json(&reply)
            .ok_or_else(|| ModelError::Malformed(format!("no JSON in guidance reply: {reply}")))?;

        serde_json::from_str(json)
            .map_err(|e| ModelError::Malformed(format!("guidance parse failed: {e}")))
    }

    async fn generate_thought(&self, topic: &str) -> std::result::Result<String, ModelError> {
        let request = CompletionRequest::new(
            self.utility_model.clone(),
            vec![
                Message::system(INSIGHT_SYSTEM),
                Message::user(format!(
                    "Offer one short inner reflection about: {topic}. \
                     One or two sentences, first person."
                )),
            ],
        )
        .with_temperature(0.7);

        let reply = self.model.complete(request).await?;
        Ok(reply.trim().to_string())
    }
}

/// An `InnerThought` that returns fixed guidance. Test wiring.
pub struct StaticInsight {
    guidance: ResponseGuidance,
    thought: String,
}

impl StaticInsight {
    pub fn new(guidance: ResponseGuidance) -> Self {
        Self {
            guidance,
            thought: "Stay present.".into(),
        }
    }
}

impl Default for StaticInsight {
    fn default() -> Self {
        Self::new(ResponseGuidance::default())
    }
}

#[async_trait]
impl InnerThought for StaticInsight {
    async fn classify_context(
        &self,
        _user_text: &str,
        _recent: &[Message],
    ) -> std::result::Result<ResponseGuidance, ModelError> {
        Ok(self.guidance.clone())
    }

    async fn generate_thought(&self, _topic: &str) -> std::result::Result<String, ModelError> {
        Ok(self.thought.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_provider::ScriptedModel;

    fn insight(replies: &[&str]) -> ModelInsight {
        ModelInsight::new(Arc::new(ScriptedModel::texts(replies)), "kindred-utility-1")
    }

    #[tokio::test]
    async fn parses_guidance_from_model_reply() {
        let insight = insight(&[r#"{"tone": "gentle", "directives": ["acknowledge the bad day first"]}"#]);

        let guidance = insight.classify_context("rough day", &[]).await.unwrap();
        assert_eq!(guidance.tone, "gentle");
        assert_eq!(guidance.directives.len(), 1);
    }

    #[tokio::test]
    async fn parses_fenced_guidance() {
        let insight = insight(&["```json\n{\"tone\": \"playful\"}\n```"]);
        let guidance = insight.classify_context("heh", &[]).await.unwrap();
        assert_eq!(guidance.tone, "playful");
        assert!(guidance.directives.is_empty());
    }

    #[tokio::test]
    async fn reply_without_json_is_malformed() {
        let insight = insight(&["just be nice to them"]);
        let err = insight.classify_context("hi", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[test]
    fn prompt_quotes_only_the_recent_tail() {
        let recent: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("message {i}")))
            .collect();

        let prompt = classify_prompt("now", &recent);
        assert!(!prompt.contains("message 3"));
        assert!(prompt.contains("message 4"));
        assert!(prompt.contains("message 9"));
        assert!(prompt.contains("The user just said: now"));
    }

    #[test]
    fn prompt_skips_system_messages() {
        let recent = vec![Message::system("persona block"), Message::user("hello")];
        let prompt = classify_prompt("hi", &recent);
        assert!(!prompt.contains("persona block"));
        assert!(prompt.contains("user: hello"));
    }

    #[tokio::test]
    async fn generate_thought_trims_whitespace() {
        let insight = insight(&["  I wonder if they slept well.  \n"]);
        let thought = insight.generate_thought("the user's mood").await.unwrap();
        assert_eq!(thought, "I wonder if they slept well.");
    }

    #[tokio::test]
    async fn static_insight_returns_fixed_guidance() {
        let fixed = StaticInsight::new(ResponseGuidance {
            tone: "steady".into(),
            directives: vec![],
        });
        let guidance = fixed.classify_context("anything", &[]).await.unwrap();
        assert_eq!(guidance.tone, "steady");
    }
}
