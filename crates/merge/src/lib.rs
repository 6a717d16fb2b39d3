//! # Kindred Merge
//!
//! The conflict-resolution engine for collaborative documents: line-level
//! diffs, three-way merge with per-hunk conflict detection, resolution
//! application, AI-suggested resolutions, and the gated save path that
//! turns concurrent writes into conflicts instead of lost updates.

pub mod diff;
pub mod gate;
pub mod merge;
pub mod resolution;
pub mod suggest;

pub use diff::{DiffLine, LineDiff, LineTag, diff_lines};
pub use gate::{SaveOutcome, VersionGate};
pub use merge::{MergeHunk, MergeResult, MergeSection, merge_three};
pub use resolution::{Resolution, apply_resolutions};
pub use suggest::{Suggestion, suggest_resolution};
