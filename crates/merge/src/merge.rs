//! Three-way merge between a base version and two divergent edits.
//!
//! The result is a sequence of sections: stable runs where both sides
//! agree, and hunks where they do not. A hunk is `conflicting` only when
//! both sides changed the same base region to different content; a hunk
//! changed on one side only carries that side as its automatic choice,
//! which is what lets most concurrent edits merge without any manual
//! resolution.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, capture_diff_slices};

/// One divergent region of a three-way merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHunk {
    /// Stable index used to address this hunk in a resolution map
    pub index: usize,

    /// Base lines for this region
    pub base: Vec<String>,

    /// The stored ("theirs") side
    pub left: Vec<String>,

    /// The incoming ("yours") side
    pub right: Vec<String>,

    /// True when both sides changed this region differently
    pub conflicting: bool,
}

impl MergeHunk {
    pub fn base_text(&self) -> String {
        self.base.join("\n")
    }

    pub fn left_text(&self) -> String {
        self.left.join("\n")
    }

    pub fn right_text(&self) -> String {
        self.right.join("\n")
    }

    /// The side a non-conflicting hunk resolves to on its own.
    pub fn auto_side(&self) -> Option<&[String]> {
        if self.conflicting {
            return None;
        }
        if self.left != self.base {
            Some(&self.left)
        } else {
            Some(&self.right)
        }
    }
}

/// One section of the merged skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeSection {
    /// Lines both sides agree on
    Stable { lines: Vec<String> },

    /// A divergent region
    Hunk(MergeHunk),
}

/// The outcome of a three-way merge: the merged skeleton plus every
/// divergent hunk, ready for automatic or manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub sections: Vec<MergeSection>,
}

impl MergeResult {
    /// All divergent hunks, conflicting or not.
    pub fn hunks(&self) -> Vec<&MergeHunk> {
        self.sections
            .iter()
            .filter_map(|s| match s {
                MergeSection::Hunk(h) => Some(h),
                MergeSection::Stable { .. } => None,
            })
            .collect()
    }

    /// Hunks that need a human or AI decision.
    pub fn conflicts(&self) -> Vec<&MergeHunk> {
        self.hunks().into_iter().filter(|h| h.conflicting).collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s, MergeSection::Hunk(h) if h.conflicting))
    }

    /// Merge without any manual input. Succeeds only when no hunk is
    /// conflicting; every one-sided hunk takes its changed side.
    pub fn auto_merge(&self) -> Option<String> {
        if self.has_conflicts() {
            return None;
        }
        let mut out: Vec<String> = Vec::new();
        for section in &self.sections {
            match section {
                MergeSection::Stable { lines } => out.extend(lines.iter().cloned()),
                MergeSection::Hunk(h) => {
                    out.extend(h.auto_side().unwrap_or(&h.base).iter().cloned())
                }
            }
        }
        Some(out.join("\n"))
    }
}

/// Split content into logical lines. Content round-trips through
/// `join("\n")`, trailing newline included.
pub(crate) fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split('\n').map(String::from).collect()
}

/// A one-sided edit: this base range became that side range.
#[derive(Debug, Clone)]
struct Edit {
    base: Range<usize>,
    side: Range<usize>,
}

fn side_edits(base: &[String], side: &[String]) -> Vec<Edit> {
    capture_diff_slices(Algorithm::Myers, base, side)
        .into_iter()
        .filter(|op| op.tag() != DiffTag::Equal)
        .map(|op| Edit {
            base: op.old_range(),
            side: op.new_range(),
        })
        .collect()
}

/// Whether two base ranges touch the same region. Empty ranges are
/// insertion points: an insertion collides with a range containing its
/// position, and two insertions collide only at the same position.
fn ranges_collide(a: &Range<usize>, b: &Range<usize>) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => a.start == b.start,
        (true, false) => b.start <= a.start && a.start < b.end,
        (false, true) => a.start <= b.start && b.start < a.end,
        (false, false) => a.start < b.end && b.start < a.end,
    }
}

/// Project a base region through one side's edit script: the side's text
/// for that region, with unchanged gaps filled from base.
fn project_region(
    base: &[String],
    side: &[String],
    edits: &[&Edit],
    region: &Range<usize>,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = region.start;
    for edit in edits {
        out.extend(base[pos..edit.base.start].iter().cloned());
        out.extend(side[edit.side.clone()].iter().cloned());
        pos = edit.base.end;
    }
    out.extend(base[pos..region.end].iter().cloned());
    out
}

/// Three-way merge of `left` and `right` against their common `base`.
pub fn merge_three(base: &str, left: &str, right: &str) -> MergeResult {
    let base_lines = split_lines(base);
    let left_lines = split_lines(left);
    let right_lines = split_lines(right);

    let left_edits = side_edits(&base_lines, &left_lines);
    let right_edits = side_edits(&base_lines, &right_lines);

    let mut sections = Vec::new();
    let mut hunk_index = 0usize;
    let mut cursor = 0usize; // position in base
    let mut li = 0usize;
    let mut ri = 0usize;

    while li < left_edits.len() || ri < right_edits.len() {
        // Next edit from either side, earliest base position first.
        let next_start = match (left_edits.get(li), right_edits.get(ri)) {
            (Some(l), Some(r)) => l.base.start.min(r.base.start),
            (Some(l), None) => l.base.start,
            (None, Some(r)) => r.base.start,
            (None, None) => unreachable!(),
        };

        if next_start > cursor {
            sections.push(MergeSection::Stable {
                lines: base_lines[cursor..next_start].to_vec(),
            });
        }

        // Coalesce every edit (from both sides) that touches the growing
        // region into one divergent hunk.
        let mut region = next_start..next_start;
        let mut taken_left: Vec<&Edit> = Vec::new();
        let mut taken_right: Vec<&Edit> = Vec::new();
        loop {
            let mut progressed = false;
            while let Some(edit) = left_edits.get(li) {
                let absorb = if taken_left.is_empty() && taken_right.is_empty() {
                    edit.base.start == next_start
                } else {
                    ranges_collide(&edit.base, &region)
                };
                if !absorb {
                    break;
                }
                region.start = region.start.min(edit.base.start);
                region.end = region.end.max(edit.base.end);
                taken_left.push(edit);
                li += 1;
                progressed = true;
            }
            while let Some(edit) = right_edits.get(ri) {
                let absorb = if taken_left.is_empty() && taken_right.is_empty() {
                    edit.base.start == next_start
                } else {
                    ranges_collide(&edit.base, &region)
                };
                if !absorb {
                    break;
                }
                region.start = region.start.min(edit.base.start);
                region.end = region.end.max(edit.base.end);
                taken_right.push(edit);
                ri += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        let left_region = project_region(&base_lines, &left_lines, &taken_left, &region);
        let right_region = project_region(&base_lines, &right_lines, &taken_right, &region);
        let base_region = base_lines[region.clone()].to_vec();

        if left_region == right_region {
            // Both sides made the same change; nothing to resolve.
            sections.push(MergeSection::Stable { lines: left_region });
        } else {
            let conflicting = !taken_left.is_empty() && !taken_right.is_empty();
            sections.push(MergeSection::Hunk(MergeHunk {
                index: hunk_index,
                base: base_region,
                left: left_region,
                right: right_region,
                conflicting,
            }));
            hunk_index += 1;
        }

        cursor = region.end;
    }

    if cursor < base_lines.len() {
        sections.push(MergeSection::Stable {
            lines: base_lines[cursor..].to_vec(),
        });
    }

    MergeResult { sections }
}
