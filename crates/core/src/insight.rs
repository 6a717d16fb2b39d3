//! Inner-thought boundary — pre-turn guidance from a small utility model.
//!
//! Before the main completion, the turn's context is classified into tone
//! and directives that shape the system message. Failures here degrade the
//! turn, never fail it; callers fall back to no guidance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::Message;

/// How the companion should shape the upcoming reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseGuidance {
    /// One-word or short-phrase tone ("gentle", "matter-of-fact")
    pub tone: String,

    /// Concrete directives for this reply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
}

impl ResponseGuidance {
    pub fn is_empty(&self) -> bool {
        self.tone.is_empty() && self.directives.is_empty()
    }
}

/// The inner-thought boundary.
#[async_trait]
pub trait InnerThought: Send + Sync {
    /// Classify the turn: what tone and directives fit the user's message
    /// given the recent exchange.
    async fn classify_context(
        &self,
        user_text: &str,
        recent: &[Message],
    ) -> std::result::Result<ResponseGuidance, ModelError>;

    /// Generate a free-standing inner thought on a topic (used for
    /// ambient persona updates, not for the reply itself).
    async fn generate_thought(&self, topic: &str) -> std::result::Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_guidance_is_detectable() {
        assert!(ResponseGuidance::default().is_empty());

        let guidance = ResponseGuidance {
            tone: "gentle".into(),
            directives: vec!["acknowledge the bad day first".into()],
        };
        assert!(!guidance.is_empty());
    }

    #[test]
    fn guidance_deserializes_without_directives() {
        let guidance: ResponseGuidance = serde_json::from_str(r#"{"tone":"playful"}"#).unwrap();
        assert_eq!(guidance.tone, "playful");
        assert!(guidance.directives.is_empty());
    }
}
