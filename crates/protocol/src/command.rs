//! Client → server commands.
//!
//! Every inbound WebSocket frame is one `{"kind": ..., "payload": ...}`
//! object. The tagged enum gives the dispatch loop compile-time
//! exhaustiveness; adding a command without handling it is a build error,
//! not a silently dead wire message.

use serde::{Deserialize, Serialize};

/// A command a client sends over its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ClientCommand {
    /// Send a chat message and start a turn.
    #[serde(rename = "chat.send", rename_all = "camelCase")]
    ChatSend {
        content: String,

        /// Private turns skip memory retrieval and post-turn storage
        #[serde(default)]
        privacy: bool,

        /// Adds the agentic guidance block to the system message
        #[serde(default)]
        agentic_mode: bool,
    },

    /// Request an autonomous browsing session. The session starts pending
    /// and fetches nothing until approved.
    #[serde(rename = "agent.start", rename_all = "camelCase")]
    AgentStart {
        query: String,

        #[serde(default)]
        max_pages: Option<u32>,

        #[serde(default)]
        max_duration_ms: Option<u64>,
    },

    /// Approve a pending browsing session.
    #[serde(rename = "agent.approve", rename_all = "camelCase")]
    AgentApprove { session_id: String },

    /// Cancel a browsing session at its next safe point.
    #[serde(rename = "agent.cancel", rename_all = "camelCase")]
    AgentCancel { session_id: String },

    /// Run the editing agent against one document.
    #[serde(rename = "editTask.run", rename_all = "camelCase")]
    EditTaskRun {
        document_id: String,

        /// What the agent should do to the document
        instruction: String,

        /// The client's current editor buffer, which becomes the working copy
        content: String,

        content_type: String,

        #[serde(default)]
        language: Option<String>,
    },

    /// Cancel the active editing session for a document.
    #[serde(rename = "editTask.cancel", rename_all = "camelCase")]
    EditTaskCancel { document_id: String },

    /// Save a new document version. `base_version` is the version the
    /// client started editing from; a mismatch with the stored version
    /// surfaces a conflict instead of overwriting.
    #[serde(rename = "document.saveVersion", rename_all = "camelCase")]
    DocumentSaveVersion {
        document_id: String,

        content: String,

        #[serde(default)]
        description: Option<String>,

        #[serde(default)]
        base_version: Option<u64>,
    },
}

impl ClientCommand {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatSend { .. } => "chat.send",
            Self::AgentStart { .. } => "agent.start",
            Self::AgentApprove { .. } => "agent.approve",
            Self::AgentCancel { .. } => "agent.cancel",
            Self::EditTaskRun { .. } => "editTask.run",
            Self::EditTaskCancel { .. } => "editTask.cancel",
            Self::DocumentSaveVersion { .. } => "document.saveVersion",
        }
    }
}
