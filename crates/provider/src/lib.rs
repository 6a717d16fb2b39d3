//! Model and network backends for Kindred.
//!
//! Everything here implements a boundary trait from `kindred_core`:
//! `OpenAiModel` and the scripted stubs are `ModelClient`s, the fetchers
//! are `PageFetcher`s. The container decides which one is wired in.

pub mod fetcher;
pub mod openai;
pub mod stubs;

pub use fetcher::HttpPageFetcher;
pub use openai::OpenAiModel;
pub use stubs::{EchoModel, ScriptedModel, ScriptedReply, StaticFetcher};
