//! Block diff engine
//!
//! Compares a document's persisted ordered block-hash list against the
//! freshly split Markdown and reduces the change to one minimal contiguous
//! edit span. The caller applies it as delete-range + insert-at-index on
//! the remote document and then persists the full new hash list.

use mdbridge_core::domain::newtypes::ContentHash;

use crate::encode::MarkdownBlock;

/// Outcome of comparing recorded block state against fresh content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Hash sequences are identical; nothing to send
    Unchanged,
    /// The live remote child count disagrees with the recorded block count:
    /// the document was edited outside this tool, so a partial patch would
    /// corrupt it. Caller must fall back to a full replace and bootstrap.
    Drifted,
    /// Minimal contiguous edit: delete `delete_len` children starting at
    /// `start`, then insert `insert` at that index
    Patch {
        start: usize,
        delete_len: usize,
        insert: Vec<MarkdownBlock>,
    },
}

/// Computes the minimal contiguous edit span
///
/// `live_child_count` is the current number of root children on the remote
/// document; any disagreement with `prev.len()` is structural drift, never
/// patched around.
pub fn compute(
    prev: &[ContentHash],
    new: &[MarkdownBlock],
    live_child_count: usize,
) -> DiffOutcome {
    if live_child_count != prev.len() {
        return DiffOutcome::Drifted;
    }

    // Matching prefix
    let mut start = 0;
    while start < prev.len() && start < new.len() && prev[start] == new[start].hash {
        start += 1;
    }

    if start == prev.len() && start == new.len() {
        return DiffOutcome::Unchanged;
    }

    // Matching suffix, never crossing the prefix
    let mut suffix = 0;
    while suffix < prev.len() - start
        && suffix < new.len() - start
        && prev[prev.len() - 1 - suffix] == new[new.len() - 1 - suffix].hash
    {
        suffix += 1;
    }

    DiffOutcome::Patch {
        start,
        delete_len: prev.len() - start - suffix,
        insert: new[start..new.len() - suffix].to_vec(),
    }
}
