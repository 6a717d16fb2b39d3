//! Line-level diff between two document versions.
//!
//! Produces the per-line change list the editor renders and the aggregate
//! stats (`task.diff` counts, similarity ratio) the engines report.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// What happened to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Added,
    Removed,
    Unchanged,
}

/// One line of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
}

/// A full line diff with aggregate stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDiff {
    pub lines: Vec<DiffLine>,

    pub additions: u32,

    pub deletions: u32,

    /// 0.0 (nothing in common) to 1.0 (identical)
    pub similarity: f32,
}

impl LineDiff {
    pub fn is_unchanged(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

/// Diff `old` against `new` at line granularity.
pub fn diff_lines(old: &str, new: &str) -> LineDiff {
    let diff = TextDiff::from_lines(old, new);
    let similarity = diff.ratio();

    let mut lines = Vec::new();
    let mut additions = 0u32;
    let mut deletions = 0u32;

    for change in diff.iter_all_changes() {
        let tag = match change.tag() {
            ChangeTag::Insert => {
                additions += 1;
                LineTag::Added
            }
            ChangeTag::Delete => {
                deletions += 1;
                LineTag::Removed
            }
            ChangeTag::Equal => LineTag::Unchanged,
        };
        let text = change
            .value()
            .trim_end_matches('\n')
            .trim_end_matches('\r')
            .to_string();
        lines.push(DiffLine { tag, text });
    }

    LineDiff {
        lines,
        additions,
        deletions,
        similarity,
    }
}
