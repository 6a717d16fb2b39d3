//! AI-suggested conflict resolutions.
//!
//! For a conflicting hunk, a utility model proposes merged text plus a
//! one-line rationale. The caller reviews it and applies it as a
//! [`crate::resolution::Resolution::Custom`]; nothing here writes anything.

use serde::{Deserialize, Serialize};

use kindred_core::error::ModelError;
use kindred_core::message::Message;
use kindred_core::model::{CompletionRequest, ModelClient, extract_json};

use crate::merge::MergeHunk;

/// A proposed resolution for one conflicting hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// The proposed merged text for the hunk
    pub text: String,

    /// Why this merge preserves both intents
    pub rationale: String,
}

const SUGGEST_PROMPT: &str = "You are resolving a merge conflict in a document. \
Two people edited the same region independently. Propose merged text that \
preserves the intent of both edits. Respond with JSON only: \
{\"text\": \"<merged text for the region>\", \"rationale\": \"<one sentence>\"}";

/// Ask `model` to propose a resolution for `hunk`.
pub async fn suggest_resolution(
    model: &dyn ModelClient,
    utility_model: &str,
    hunk: &MergeHunk,
) -> Result<Suggestion, ModelError> {
    let request = CompletionRequest::new(
        utility_model,
        vec![
            Message::system(SUGGEST_PROMPT),
            Message::user(format!(
                "Original:\n{}\n\nFirst edit:\n{}\n\nSecond edit:\n{}",
                hunk.base_text(),
                hunk.left_text(),
                hunk.right_text(),
            )),
        ],
    )
    .with_temperature(0.2);

    let reply = model.complete(request).await?;
    let json = extract_json(&reply)
        .ok_or_else(|| ModelError::Malformed("no JSON object in suggestion reply".into()))?;
    serde_json::from_str(json)
        .map_err(|e| ModelError::Malformed(format!("bad suggestion JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ModelError> {
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn hunk() -> MergeHunk {
        MergeHunk {
            index: 0,
            base: vec!["B".into()],
            left: vec!["X".into()],
            right: vec!["Z".into()],
            conflicting: true,
        }
    }

    #[tokio::test]
    async fn parses_fenced_suggestion() {
        let model = Scripted {
            replies: Mutex::new(vec![
                "```json\n{\"text\": \"X and Z\", \"rationale\": \"keeps both\"}\n```".into(),
            ]),
        };
        let suggestion = suggest_resolution(&model, "utility", &hunk()).await.unwrap();
        assert_eq!(suggestion.text, "X and Z");
        assert_eq!(suggestion.rationale, "keeps both");
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let model = Scripted {
            replies: Mutex::new(vec!["I can't decide.".into()]),
        };
        let err = suggest_resolution(&model, "utility", &hunk())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }
}
