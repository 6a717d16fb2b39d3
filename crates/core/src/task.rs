//! Agentic task vocabulary — phases, iterations, checkpoints, summaries.
//!
//! One vocabulary serves every agentic session (browsing, editing): the
//! engine records what happened as append-only [`AgenticIteration`] entries
//! and reports the outcome as a [`TaskSummary`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of an agentic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Idle,
    Planning,
    Executing,
    Verifying,
    Complete,
    Error,
}

impl TaskPhase {
    /// Complete and Error accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Legal phase transitions. Error is reachable from any non-terminal
    /// phase; planning is optional.
    pub fn can_transition_to(&self, next: TaskPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TaskPhase::Error {
            return true;
        }
        matches!(
            (self, next),
            (Self::Idle, Self::Planning)
                | (Self::Idle, Self::Executing)
                | (Self::Planning, Self::Executing)
                | (Self::Executing, Self::Verifying)
                | (Self::Executing, Self::Complete)
                | (Self::Verifying, Self::Executing)
                | (Self::Verifying, Self::Complete)
        )
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Where the goal stands after an iteration's evaluation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    InProgress,
    Achieved,
    Blocked,
}

/// A tool the behavior wants to run, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub params: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// What came back from running a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,

    /// Short description of the result, suitable for the iteration log
    pub summary: String,
}

impl ToolOutcome {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
        }
    }
}

/// One entry in the append-only iteration log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticIteration {
    /// 1-based iteration number
    pub step: u32,

    /// The behavior's narrated reasoning for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<String>,

    /// The tool call made this step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolInvocation>,

    /// The tool's result, if a call was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolOutcome>,

    /// Goal status after evaluation
    pub goal: GoalStatus,
}

/// A restorable snapshot taken before a destructive write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// What this checkpoint protects ("before rewrite of section 2")
    pub label: String,

    /// The content to restore
    pub content: String,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Why a task failed, in user-facing terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,

    /// Whether retrying or rephrasing could help
    pub recoverable: bool,

    /// A concrete suggestion for the user, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Set when the user cancelled; clients render this as a deliberate
    /// stop, not a bug
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskFailure {
    pub fn cancelled() -> Self {
        Self {
            message: "cancelled by user".into(),
            recoverable: false,
            suggestion: None,
            cancelled: true,
        }
    }
}

/// The outcome of a finished task, success or not.
///
/// A task that hit an iteration or page bound still counts as a success
/// with whatever it accomplished; `failure` is set only for real errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub success: bool,

    /// One human-readable line describing the outcome
    pub summary: String,

    /// Domain-specific progress count (pages visited, lines changed)
    pub changes_applied: u32,

    /// Iterations the loop ran
    pub iterations: u32,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

/// Hard limits on a task. Exhausting a bound finishes the task with
/// partial results; it is not an error.
#[derive(Debug, Clone)]
pub struct TaskBounds {
    pub max_iterations: u32,

    pub max_duration: Duration,

    /// Browsing only: page-visit cap
    pub max_pages: Option<u32>,
}

impl Default for TaskBounds {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            max_duration: Duration::from_secs(120),
            max_pages: None,
        }
    }
}

/// Status of one sub-goal in an editing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubGoalStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

/// One step of a decomposed editing instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGoal {
    /// Position in the plan, 0-based
    pub id: u32,

    pub description: String,

    /// IDs of sub-goals that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<u32>,

    pub status: SubGoalStatus,
}

impl SubGoal {
    pub fn new(id: u32, description: impl Into<String>, depends_on: Vec<u32>) -> Self {
        Self {
            id,
            description: description.into(),
            depends_on,
            status: SubGoalStatus::Pending,
        }
    }
}
