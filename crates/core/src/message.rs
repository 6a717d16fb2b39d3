//! Message domain types and the conversation store boundary.
//!
//! Messages are the value objects that flow through every turn:
//! the user sends one, context assembly arranges them, the streaming
//! engine persists the assistant's bubbles as new ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an agentic session (browsing or editing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The companion
    Assistant,
    /// System instructions (persona, guidance)
    System,
}

/// Where a message came from, when it was not typed in the chat box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Ordinary chat exchange
    Chat,
    /// Injected document context
    Document,
    /// A turn that triggered an autonomous browsing session
    BrowsingTrigger,
    /// A note the memory subsystem surfaced into the conversation
    MemoryNote,
}

/// Side-channel facts about a message that orchestration needs but the
/// rendered transcript does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auxiliary {
    pub origin: MessageOrigin,

    /// Excluded from the rolling history window during context assembly.
    #[serde(default)]
    pub hidden_from_history: bool,
}

impl Auxiliary {
    pub fn hidden(origin: MessageOrigin) -> Self {
        Self {
            origin,
            hidden_from_history: true,
        }
    }
}

/// A single message in a conversation.
///
/// Persisted messages are immutable apart from the soft-delete flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (durable once persisted)
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub created_at: DateTime<Utc>,

    /// Origin and visibility hints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Auxiliary>,

    /// Soft-delete flag; deleted messages stay stored but leave the window
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            auxiliary: None,
            deleted: false,
        }
    }

    /// Attach origin/visibility metadata.
    pub fn with_auxiliary(mut self, auxiliary: Auxiliary) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    /// Whether context assembly must keep this message out of the
    /// rolling history window.
    pub fn is_hidden_from_history(&self) -> bool {
        self.deleted
            || self
                .auxiliary
                .as_ref()
                .is_some_and(|aux| aux.hidden_from_history)
    }
}

/// The conversation store boundary.
///
/// Implementations persist messages in arrival order. `append` assigns
/// the durable ID: whatever provisional ID the caller put on the message
/// is replaced, and the returned message carries the one that sticks.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a message, assigning its durable ID. Returns the stored copy.
    async fn append(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> std::result::Result<Message, StoreError>;

    /// The last `limit` non-deleted messages, oldest first.
    async fn recent(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Soft-delete a message. Returns false when the ID is unknown.
    async fn soft_delete(
        &self,
        conversation: &ConversationId,
        message_id: &str,
    ) -> std::result::Result<bool, StoreError>;
}
