//! # Kindred Agentic
//!
//! The autonomous task engine: one generic think / tool-call / evaluate
//! loop ([`TaskEngine`]) parameterized by a [`TaskBehavior`], with the two
//! behaviors the companion ships — approval-gated web browsing and
//! version-gated document editing — plus the sub-goal planner the editing
//! pre-phase uses.

pub mod browse;
pub mod edit;
pub mod engine;
pub mod plan;

pub use browse::{BrowsingSession, DEFAULT_MAX_PAGES};
pub use edit::EditingAgent;
pub use engine::{
    DEFAULT_BLOCKED_THRESHOLD, DEFAULT_HEARTBEAT_EVERY, TaskBehavior, TaskContext, TaskEngine,
    ThinkOutcome,
};
pub use plan::{EditPlan, decompose};
