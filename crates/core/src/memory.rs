//! Memory trait — long-lived facts the companion recalls mid-conversation.
//!
//! Memories are a read-only input to context assembly; the write side runs
//! after each turn, when the exchange is distilled into zero or one new
//! memory. Retrieval never blocks a turn on classification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// What kind of fact a memory captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A specific event ("we talked about her trip to Lisbon on Friday")
    Episodic,
    /// A standing fact ("the user is allergic to shellfish")
    Semantic,
}

/// A single remembered fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique ID for this memory
    pub id: String,

    /// Episodic or semantic
    pub kind: MemoryKind,

    /// Importance in [0.0, 1.0]; retrieval weights by it
    pub importance: f32,

    /// The remembered content
    pub content: String,

    /// When this memory was created
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(kind: MemoryKind, importance: f32, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            importance: importance.clamp(0.0, 1.0),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// The memory store boundary.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "keyword", "null").
    fn name(&self) -> &str;

    /// The `top_k` memories most relevant to `query`, best first.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<Memory>, MemoryError>;

    /// Distill one completed exchange into at most one new memory.
    ///
    /// `importance_guidance` is a free-text hint that weights the verdict
    /// (e.g. "the user explicitly asked to remember this"). Returns `None`
    /// when the exchange is not worth keeping. Runs after the assistant's
    /// reply is persisted, never during the turn.
    async fn classify_and_store(
        &self,
        user_text: &str,
        assistant_text: &str,
        importance_guidance: Option<&str>,
    ) -> std::result::Result<Option<Memory>, MemoryError>;
}
