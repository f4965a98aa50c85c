//! Unified-diff patch scanning for single-file patches.
//!
//! The scanner keeps one nullable line counter. A hunk header resets it to
//! the pre-image start; a context line advances it; `+` and `-` lines are
//! recorded at the current value **without advancing it**. That asymmetry
//! does not match textbook unified-diff numbering — it is the behavior
//! consumers of these line positions were built against, so it is kept
//! exactly as is.

/// Line positions extracted from one file's patch.
///
/// Both sequences are 1-based and in encounter order, which within a hunk
/// means monotonically non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineDiff {
    /// Counter values at which `+` lines were seen.
    pub additions: Vec<u32>,
    /// Counter values at which `-` lines were seen.
    pub deletions: Vec<u32>,
}

impl LineDiff {
    /// True when the patch contained no recorded additions or deletions.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Scan unified-diff patch text for one file into a [`LineDiff`].
///
/// Never fails: a patch with zero hunks yields an empty diff, and a hunk
/// header whose pre-image start cannot be parsed empties the result rather
/// than erroring — classification degrades to "no line information".
pub fn parse_patch(patch: &str) -> LineDiff {
    let mut additions = Vec::new();
    let mut deletions = Vec::new();
    // None until the first hunk header; file headers like `+++ b/...`
    // before it fall through unrecorded.
    let mut current: Option<u32> = None;

    for line in patch.split('\n') {
        if line.starts_with("@@") {
            match hunk_start(line) {
                Some(start) => current = Some(start),
                None => {
                    log::debug!("unparseable hunk header {line:?}, dropping line positions");
                    return LineDiff::default();
                }
            }
        } else if line.starts_with(' ') {
            if let Some(n) = current {
                current = Some(n + 1);
            }
        } else if line.starts_with('+') {
            if let Some(n) = current {
                additions.push(n);
            }
        } else if line.starts_with('-') {
            if let Some(n) = current {
                deletions.push(n);
            }
        }
    }

    LineDiff {
        additions,
        deletions,
    }
}

/// Pre-image start of a `@@ -<start>,<count> +<start2>,<count2> @@` header:
/// the digits from column 4 up to the first comma.
fn hunk_start(header: &str) -> Option<u32> {
    let comma = header.find(',')?;
    header.get(4..comma)?.parse().ok()
}
