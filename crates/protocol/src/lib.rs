//! # Kindred Protocol
//!
//! The real-time wire contract between the gateway and its clients: tagged
//! `{kind, payload}` commands and events, plus the per-client [`EventSink`]
//! every engine reports through.
//!
//! The enums are the protocol. Dispatch is an exhaustive `match`, so a new
//! command or event cannot be added without every consumer handling it.

pub mod command;
pub mod event;
pub mod sink;

pub use command::ClientCommand;
pub use event::{ConflictHunk, ServerEvent};
pub use sink::EventSink;
