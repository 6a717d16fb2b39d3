//! ModelClient trait — the abstraction over LLM backends.
//!
//! A ModelClient knows how to send an assembled prompt to a model and get
//! text back, either whole or as a stream of deltas. Orchestration code
//! never sees HTTP; it sees this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::Message;

/// A fully assembled request for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o", "kindred-chat-1")
    pub model: String,

    /// The assembled context, in final order
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.8
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A single chunk in a streaming response.
///
/// `split` marks an explicit message-split signal from the backend; the
/// streaming engine also watches the text itself for the split marker, so
/// scripted backends can use whichever is convenient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub delta: Option<String>,

    /// Start a new message bubble after the buffered text
    #[serde(default)]
    pub split: bool,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn split() -> Self {
        Self {
            split: true,
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// The model client boundary.
///
/// Every backend (OpenAI-compatible HTTP, scripted test doubles) implements
/// this trait; the pipelines call `complete()` or `stream()` without knowing
/// which one is wired in.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Send a request and get the whole response text.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, ModelError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and yields the result as a
    /// single chunk followed by a done marker.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ModelError>>,
        ModelError,
    > {
        let text = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx.send(Ok(StreamChunk::text(text))).await;
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }
}

/// Pull the JSON object out of a model reply.
///
/// Models asked for JSON still wrap it in prose or a code fence often
/// enough that every structured call site needs this. Returns the fenced
/// block when present, otherwise the outermost `{...}` span.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            let candidate = rest[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate);
            }
        }
    }

    let open = text.find('{')?;
    let close = text.rfind('}')?;
    if close > open {
        return Some(&text[open..=close]);
    }
    None
}
