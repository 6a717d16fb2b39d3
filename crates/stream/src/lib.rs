//! Streaming delivery for Kindred chat turns.
//!
//! [`StreamEngine`] turns a provider token stream into batched client
//! events with message splitting and durable persistence; [`SendDeduper`]
//! drops accidental double-submits before a turn ever starts.

pub mod dedup;
pub mod engine;

pub use dedup::SendDeduper;
pub use engine::{SPLIT_MARKER, StreamEngine, StreamError, StreamOutcome};
