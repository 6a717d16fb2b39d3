//! Applying per-hunk resolutions to a merge result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use kindred_core::error::MergeError;

use crate::merge::{MergeResult, MergeSection, split_lines};

/// How one hunk gets resolved.
///
/// An AI-suggested resolution arrives as `Custom` carrying the suggested
/// text (see [`crate::suggest::suggest_resolution`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    AcceptLeft,
    AcceptRight,
    /// Left lines, then right lines
    KeepBoth,
    Custom { text: String },
}

/// Rewrite the document by substituting each hunk's resolution into the
/// merged skeleton.
///
/// Any hunk may be overridden, conflicting or not; hunks without an entry
/// fall back to their automatic side. Unresolved conflicting hunks are an
/// error unless `force` is set, in which case they keep both sides.
pub fn apply_resolutions(
    result: &MergeResult,
    resolutions: &HashMap<usize, Resolution>,
    force: bool,
) -> Result<String, MergeError> {
    let hunk_count = result.hunks().len();
    if let Some(&index) = resolutions.keys().find(|&&index| index >= hunk_count) {
        return Err(MergeError::HunkOutOfRange { index });
    }

    if !force {
        let unresolved = result
            .conflicts()
            .iter()
            .filter(|h| !resolutions.contains_key(&h.index))
            .count();
        if unresolved > 0 {
            return Err(MergeError::UnresolvedConflicts { count: unresolved });
        }
    }

    let mut out: Vec<String> = Vec::new();
    for section in &result.sections {
        match section {
            MergeSection::Stable { lines } => out.extend(lines.iter().cloned()),
            MergeSection::Hunk(hunk) => match resolutions.get(&hunk.index) {
                Some(Resolution::AcceptLeft) => out.extend(hunk.left.iter().cloned()),
                Some(Resolution::AcceptRight) => out.extend(hunk.right.iter().cloned()),
                Some(Resolution::KeepBoth) => {
                    out.extend(hunk.left.iter().cloned());
                    out.extend(hunk.right.iter().cloned());
                }
                Some(Resolution::Custom { text }) => out.extend(split_lines(text)),
                None => match hunk.auto_side() {
                    Some(side) => out.extend(side.iter().cloned()),
                    // Unresolved conflict under `force`: keep both sides.
                    None => {
                        out.extend(hunk.left.iter().cloned());
                        out.extend(hunk.right.iter().cloned());
                    }
                },
            },
        }
    }
    Ok(out.join("\n"))
}
