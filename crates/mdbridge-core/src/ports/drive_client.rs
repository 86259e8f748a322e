//! Remote drive / listing client port (driven/secondary port)
//!
//! Folder listing, object metadata and object lifecycle against the cloud
//! workspace. The implementation handles pagination internally; callers see
//! complete child lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::ObjectToken;

/// Remote object kind as reported by the listing API
///
/// `Other` covers remote-native types the codec does not understand; they
/// pass through as opaque downloads only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteObjectKind {
    Folder,
    Document,
    Sheet,
    Base,
    File,
    Other,
}

/// A single entry from a folder listing
///
/// Port-level DTO; the runner maps these onto [`SyncLink`](crate::SyncLink)
/// entries and local paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteObject {
    pub token: ObjectToken,
    pub name: String,
    pub kind: RemoteObjectKind,
    pub parent: Option<ObjectToken>,
    /// Monotonic revision counter maintained by the service
    pub revision: i64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Byte size for plain files; None for folders and documents
    pub size: Option<u64>,
}

/// Typed outcome of a delete call
///
/// "Already deleted" is an expected outcome, not an error: the adapter
/// classifies the remote response so the runner branches on data instead of
/// parsing error message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Port trait for drive-level operations
#[async_trait::async_trait]
pub trait IDriveClient: Send + Sync {
    /// Lists the immediate children of a folder (all pages)
    async fn list_folder(&self, folder: &ObjectToken) -> anyhow::Result<Vec<RemoteObject>>;

    /// Fetches metadata for a single object
    async fn get_metadata(&self, token: &ObjectToken) -> anyhow::Result<RemoteObject>;

    /// Fetches metadata for several objects in one round trip
    async fn batch_metadata(&self, tokens: &[ObjectToken]) -> anyhow::Result<Vec<RemoteObject>>;

    /// Deletes an object; absence is reported as a success variant
    async fn delete_object(&self, token: &ObjectToken) -> anyhow::Result<DeleteOutcome>;

    /// Creates a subfolder, returning its token
    async fn create_folder(
        &self,
        parent: &ObjectToken,
        name: &str,
    ) -> anyhow::Result<ObjectToken>;
}
