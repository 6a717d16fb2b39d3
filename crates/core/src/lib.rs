//! # Kindred Core
//!
//! Domain types, collaborator traits, and error definitions for the Kindred
//! companion engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the orchestration layer talks to — model backend,
//! memory, persona, inner thought, conversations, documents, page fetcher —
//! is defined as a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping implementations via the container's wiring
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod fetch;
pub mod insight;
pub mod memory;
pub mod message;
pub mod model;
pub mod persona;
pub mod task;

// Re-export key types at crate root for ergonomics
pub use document::{Document, DocumentStore, DocumentVersion, VersionAuthor};
pub use error::{
    Error, FetchError, MemoryError, MergeError, ModelError, Result, StoreError, TaskError,
};
pub use fetch::{FetchedPage, PageFetcher};
pub use insight::{InnerThought, ResponseGuidance};
pub use memory::{Memory, MemoryKind, MemoryStore};
pub use message::{
    Auxiliary, ConversationId, ConversationStore, Message, MessageOrigin, Role, SessionId,
};
pub use model::{CompletionRequest, ModelClient, StreamChunk, extract_json};
pub use persona::{
    MoodDelta, MoodSnapshot, PersonaSnapshot, PersonaStore, RelationshipDelta,
    RelationshipSnapshot, RelationshipStage,
};
pub use task::{
    AgenticIteration, Checkpoint, GoalStatus, SubGoal, SubGoalStatus, TaskBounds, TaskFailure,
    TaskPhase, TaskSummary, ToolInvocation, ToolOutcome,
};
