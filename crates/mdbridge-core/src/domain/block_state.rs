//! Block state - per-document ordered block-hash list
//!
//! One row per (document, index). The diff engine compares the stored
//! sequence against freshly split Markdown to find the minimal edit span,
//! and compares `total_blocks` against the live remote child count to
//! detect structural drift (the document was edited outside this tool).
//! After any successful update the whole sequence is replaced, never merged.

use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, ObjectToken};

/// One block's recorded hash within a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStateItem {
    pub document: ObjectToken,
    /// Zero-based position among the document root's children
    pub index: u32,
    pub hash: ContentHash,
    /// Child count of the document root when this state was recorded
    pub total_blocks: u32,
}

impl BlockStateItem {
    pub fn new(document: ObjectToken, index: u32, hash: ContentHash, total_blocks: u32) -> Self {
        Self {
            document,
            index,
            hash,
            total_blocks,
        }
    }
}

/// Builds a full replacement state for a document from an ordered hash list
pub fn document_state(document: &ObjectToken, hashes: &[ContentHash]) -> Vec<BlockStateItem> {
    let total = hashes.len() as u32;
    hashes
        .iter()
        .enumerate()
        .map(|(i, h)| BlockStateItem::new(document.clone(), i as u32, h.clone(), total))
        .collect()
}
