//! mdbridge Codec - Markdown ↔ remote block tree
//!
//! Pure document conversion logic, no I/O:
//!
//! - [`block`] - typed block model parsed from the service's raw block JSON
//! - [`decode`] - block tree → Markdown rendering
//! - [`encode`] - Markdown block splitting, normalization, and hashing
//! - [`diff`] - minimal contiguous edit span between block-hash sequences
//!
//! The service owns the Markdown → block-payload conversion itself (via the
//! document client port); this crate only splits and hashes the local side,
//! and renders the remote side back into Markdown.

pub mod block;
pub mod decode;
pub mod diff;
pub mod encode;

pub use block::{Block, BlockNode, BlockTree, InlineElement, ListSequence, TextStyle};
pub use decode::{AssetRequest, DecodeOutput, Decoder};
pub use diff::DiffOutcome;
pub use encode::{hash_block, split_markdown, MarkdownBlock};

/// Errors produced while parsing or rendering a block tree
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The block list has no page (root) block
    #[error("Block list has no root page block")]
    MissingRoot,

    /// A block references a child id that is not in the list
    #[error("Block '{parent}' references unknown child '{child}'")]
    DanglingChild { parent: String, child: String },

    /// A table block's declared geometry does not cover its cells
    #[error("Table '{0}' has inconsistent row/column counts")]
    MalformedTable(String),
}
