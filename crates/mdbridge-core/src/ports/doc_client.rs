//! Remote document block client port (driven/secondary port)
//!
//! Operations on a block-structured remote document: fetching its flat
//! block list, editing a contiguous child range of the root, and asking the
//! service to convert Markdown text into its own block payload (the service
//! owns that conversion; the codec only splits and hashes locally).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::newtypes::ObjectToken;

/// One block as returned by the block-list API
///
/// `content` carries the service's type-specific JSON body; the codec maps
/// it into its typed block model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub block_id: String,
    /// Service block-type discriminator
    pub block_type: u32,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub content: Value,
}

/// Opaque block payload accepted by create/insert/replace operations
///
/// Produced by the service's Markdown conversion endpoint and passed back
/// verbatim; this core never constructs one field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload(pub Value);

/// Port trait for document block operations
#[async_trait::async_trait]
pub trait IDocClient: Send + Sync {
    /// Fetches the full block list of a document (root page included)
    async fn fetch_blocks(&self, document: &ObjectToken) -> anyhow::Result<Vec<RawBlock>>;

    /// Deletes `len` children of the document root starting at `start`
    async fn delete_children(
        &self,
        document: &ObjectToken,
        start: u32,
        len: u32,
    ) -> anyhow::Result<()>;

    /// Inserts a block payload as children of the root at `index`,
    /// returning the created block ids in order
    async fn insert_children(
        &self,
        document: &ObjectToken,
        index: u32,
        payload: &BlockPayload,
    ) -> anyhow::Result<Vec<String>>;

    /// Converts Markdown text through the service's own converter
    async fn convert_markdown(&self, markdown: &str) -> anyhow::Result<BlockPayload>;

    /// Replaces the entire content of an existing document
    async fn replace_document(
        &self,
        document: &ObjectToken,
        payload: &BlockPayload,
    ) -> anyhow::Result<()>;

    /// Creates a new document in a folder with the given content
    async fn create_document(
        &self,
        folder: &ObjectToken,
        title: &str,
        payload: &BlockPayload,
    ) -> anyhow::Result<ObjectToken>;

    /// Looks up a document by its title within a folder
    ///
    /// Used to avoid creating duplicates when a document with the derived
    /// name already exists remotely.
    async fn find_document_by_name(
        &self,
        folder: &ObjectToken,
        title: &str,
    ) -> anyhow::Result<Option<ObjectToken>>;
}
