//! Context assembly for Kindred chat turns.
//!
//! One pure, deterministic pipeline: collaborator outputs in (persona
//! snapshot, guidance, memories, history, document), an ordered provider
//! prompt out. Retrieval and persistence stay with the caller; this crate
//! only decides what the model sees and in what order.

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyError, AssemblyStats, ContextAssembler, TurnInput,
};
