//! In-process collaborator implementations for Kindred.
//!
//! Every store here lives behind a boundary trait from `kindred_core`
//! and keeps its state in process memory behind a `tokio::sync::RwLock`.
//! The container picks which implementation backs each boundary.

pub mod conversation;
pub mod document;
pub mod insight;
pub mod memory;
pub mod persona;

pub use conversation::InMemoryConversations;
pub use document::InMemoryDocuments;
pub use insight::{ModelInsight, StaticInsight};
pub use memory::{KeywordMemory, NullMemory};
pub use persona::{FixedPersona, PersonaEngine};
