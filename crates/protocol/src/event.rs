//! Server → client events.
//!
//! Everything the engines report — streamed tokens, agentic progress,
//! version saves, conflicts — travels as one of these over the client's
//! single ordered channel. Payload fields are camelCase on the wire;
//! nested domain objects keep their own serialization.

use serde::{Deserialize, Serialize};

use kindred_core::message::Message;
use kindred_core::task::{TaskFailure, TaskPhase, TaskSummary};

/// One hunk of a version conflict, as shown to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictHunk {
    /// Hunk index, stable across the resolution round trip
    pub index: usize,

    /// What the base version had in this region
    pub base: String,

    /// The stored (concurrently saved) side
    pub left: String,

    /// The incoming (client) side
    pub right: String,
}

/// An event the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ServerEvent {
    // ── Chat streaming ──
    /// A batch of streamed tokens for one message bubble.
    #[serde(rename = "chat.token", rename_all = "camelCase")]
    ChatToken { message_index: u32, text: String },

    /// The turn continues in a new message bubble.
    #[serde(rename = "chat.split")]
    ChatSplit,

    /// The turn finished; all bubbles are final.
    #[serde(rename = "chat.complete", rename_all = "camelCase")]
    ChatComplete { message_count: u32 },

    /// A bubble was persisted; the durable message replaces the streamed
    /// bubble at `message_index`.
    #[serde(rename = "chat.messageSaved", rename_all = "camelCase")]
    ChatMessageSaved { message_index: u32, message: Message },

    /// The turn failed before or during streaming.
    #[serde(rename = "chat.error")]
    ChatError { error: String },

    // ── Browsing agent ──
    /// A browsing session awaits approval with these bounds.
    #[serde(rename = "agent.requestApproval", rename_all = "camelCase")]
    AgentRequestApproval {
        session_id: String,
        query: String,
        max_pages: u32,
        max_duration_ms: u64,
    },

    /// Phase/step progress for a browsing session.
    #[serde(rename = "agent.status", rename_all = "camelCase")]
    AgentStatus {
        session_id: String,
        phase: TaskPhase,
        step: u32,
    },

    /// One page was fetched and summarized.
    #[serde(rename = "agent.page", rename_all = "camelCase")]
    AgentPage {
        session_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        summary: String,
    },

    /// The browsing session finished with findings.
    #[serde(rename = "agent.complete", rename_all = "camelCase")]
    AgentComplete {
        session_id: String,
        summary: String,
        pages_visited: u32,
    },

    /// The browsing session failed.
    #[serde(rename = "agent.error", rename_all = "camelCase")]
    AgentError {
        session_id: String,
        error: String,
        recoverable: bool,
        #[serde(default)]
        cancelled: bool,
    },

    // ── Agentic tasks (editing) ──
    /// A task started.
    #[serde(rename = "task.start", rename_all = "camelCase")]
    TaskStart {
        task_id: String,
        goal: String,
        estimated_steps: u32,
    },

    /// The task moved to a new phase.
    #[serde(rename = "task.phase", rename_all = "camelCase")]
    TaskPhaseChanged { task_id: String, phase: TaskPhase },

    /// The behavior's narrated reasoning for the current step.
    #[serde(rename = "task.thinking", rename_all = "camelCase")]
    TaskThinking { task_id: String, text: String },

    /// A tool call is about to run.
    #[serde(rename = "task.toolCall", rename_all = "camelCase")]
    TaskToolCall {
        task_id: String,
        tool: String,
        params: serde_json::Value,
    },

    /// The tool call returned.
    #[serde(rename = "task.toolResult", rename_all = "camelCase")]
    TaskToolResult {
        task_id: String,
        success: bool,
        summary: String,
    },

    /// Line-level impact of the latest write.
    #[serde(rename = "task.diff", rename_all = "camelCase")]
    TaskDiff {
        task_id: String,
        lines_added: u32,
        lines_removed: u32,
    },

    /// A checkpoint was taken before a destructive write.
    #[serde(rename = "task.checkpoint", rename_all = "camelCase")]
    TaskCheckpoint { task_id: String, description: String },

    /// The task finished.
    #[serde(rename = "task.complete", rename_all = "camelCase")]
    TaskComplete {
        task_id: String,
        success: bool,
        summary: String,
        changes_count: u32,
        iterations_count: u32,
        duration_ms: u64,
    },

    /// The task failed (or was cancelled; see `cancelled`).
    #[serde(rename = "task.error", rename_all = "camelCase")]
    TaskError {
        task_id: String,
        error: String,
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
        #[serde(default)]
        cancelled: bool,
    },

    /// Still working; emitted during long model/tool calls.
    #[serde(rename = "task.heartbeat", rename_all = "camelCase")]
    TaskHeartbeat { task_id: String, elapsed_ms: u64 },

    // ── Documents ──
    /// A new version was persisted.
    #[serde(rename = "document.versionSaved", rename_all = "camelCase")]
    DocumentVersionSaved { document_id: String, version: u64 },

    /// A save collided with a concurrent one; hunks need resolution.
    #[serde(rename = "document.conflict", rename_all = "camelCase")]
    DocumentConflict {
        document_id: String,
        base_version: u64,
        stored_version: u64,
        hunks: Vec<ConflictHunk>,
    },

    /// A document operation failed outright (not a conflict).
    #[serde(rename = "document.error", rename_all = "camelCase")]
    DocumentError { document_id: String, error: String },
}

impl ServerEvent {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatToken { .. } => "chat.token",
            Self::ChatSplit => "chat.split",
            Self::ChatComplete { .. } => "chat.complete",
            Self::ChatMessageSaved { .. } => "chat.messageSaved",
            Self::ChatError { .. } => "chat.error",
            Self::AgentRequestApproval { .. } => "agent.requestApproval",
            Self::AgentStatus { .. } => "agent.status",
            Self::AgentPage { .. } => "agent.page",
            Self::AgentComplete { .. } => "agent.complete",
            Self::AgentError { .. } => "agent.error",
            Self::TaskStart { .. } => "task.start",
            Self::TaskPhaseChanged { .. } => "task.phase",
            Self::TaskThinking { .. } => "task.thinking",
            Self::TaskToolCall { .. } => "task.toolCall",
            Self::TaskToolResult { .. } => "task.toolResult",
            Self::TaskDiff { .. } => "task.diff",
            Self::TaskCheckpoint { .. } => "task.checkpoint",
            Self::TaskComplete { .. } => "task.complete",
            Self::TaskError { .. } => "task.error",
            Self::TaskHeartbeat { .. } => "task.heartbeat",
            Self::DocumentVersionSaved { .. } => "document.versionSaved",
            Self::DocumentConflict { .. } => "document.conflict",
            Self::DocumentError { .. } => "document.error",
        }
    }

    /// Build a `task.complete` event from a task summary.
    pub fn task_complete(task_id: impl Into<String>, summary: &TaskSummary) -> Self {
        Self::TaskComplete {
            task_id: task_id.into(),
            success: summary.success,
            summary: summary.summary.clone(),
            changes_count: summary.changes_applied,
            iterations_count: summary.iterations,
            duration_ms: summary.duration_ms,
        }
    }

    /// Build a `task.error` event from a task failure.
    pub fn task_error(task_id: impl Into<String>, failure: &TaskFailure) -> Self {
        Self::TaskError {
            task_id: task_id.into(),
            error: failure.message.clone(),
            recoverable: failure.recoverable,
            suggestion: failure.suggestion.clone(),
            cancelled: failure.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_event_camel_case() {
        let event = ServerEvent::ChatToken {
            message_index: 1,
            text: "hello ".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "chat.token");
        assert_eq!(value["payload"]["messageIndex"], 1);
        assert_eq!(value["payload"]["text"], "hello ");
    }

    #[test]
    fn split_event_has_no_payload() {
        let value = serde_json::to_value(ServerEvent::ChatSplit).unwrap();
        assert_eq!(value["kind"], "chat.split");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn task_complete_is_flat() {
        let summary = TaskSummary {
            success: true,
            summary: "applied 3 edits".into(),
            changes_applied: 17,
            iterations: 4,
            duration_ms: 5120,
            failure: None,
        };
        let value =
            serde_json::to_value(ServerEvent::task_complete("task_1", &summary)).unwrap();
        assert_eq!(value["kind"], "task.complete");
        assert_eq!(value["payload"]["changesCount"], 17);
        assert_eq!(value["payload"]["iterationsCount"], 4);
        assert_eq!(value["payload"]["durationMs"], 5120);
    }

    #[test]
    fn task_error_carries_cancelled_flag() {
        let failure = TaskFailure::cancelled();
        let value = serde_json::to_value(ServerEvent::task_error("task_1", &failure)).unwrap();
        assert_eq!(value["payload"]["cancelled"], true);
        assert_eq!(value["payload"]["recoverable"], false);
        assert!(value["payload"].get("suggestion").is_none());
    }

    #[test]
    fn phase_serializes_snake_case_inside_payload() {
        let event = ServerEvent::TaskPhaseChanged {
            task_id: "t".into(),
            phase: TaskPhase::Executing,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["phase"], "executing");
    }

    #[test]
    fn conflict_event_round_trip() {
        let event = ServerEvent::DocumentConflict {
            document_id: "doc_1".into(),
            base_version: 3,
            stored_version: 4,
            hunks: vec![ConflictHunk {
                index: 0,
                base: "B".into(),
                left: "X".into(),
                right: "Y".into(),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""baseVersion":3"#));
        assert!(json.contains(r#""storedVersion":4"#));

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        match back {
            ServerEvent::DocumentConflict { hunks, .. } => {
                assert_eq!(hunks.len(), 1);
                assert_eq!(hunks[0].left, "X");
            }
            other => panic!("wrong variant: {:?}", other.kind()),
        }
    }

    #[test]
    fn kind_covers_every_variant_name() {
        let event = ServerEvent::TaskHeartbeat {
            task_id: "t".into(),
            elapsed_ms: 900,
        };
        assert_eq!(event.kind(), "task.heartbeat");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], event.kind());
    }
}
