//! Sync link entity - the local-path ↔ remote-object identity ledger row
//!
//! One [`SyncLink`] exists per synchronized local path. It is the change
//! detection oracle: the recorded fingerprints decide whether a download or
//! upload can be skipped. Links are created on first successful sync,
//! updated after every transfer (last-write-wins), and deleted once the
//! path is reconciled as gone on both sides.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, ObjectToken, TaskId};

/// Kind of remote object a link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteObjectType {
    /// Block-structured document the codec understands
    Document,
    /// Spreadsheet; downloads via an export job
    Sheet,
    /// Multidimensional table; downloads via an export job
    Base,
    Folder,
    /// Any other type; passes through as an opaque binary
    File,
    /// A raw Markdown mirror copy managed by this tool
    MarkdownMirror,
}

/// Persistent mapping from a local path to its remote counterpart
#[derive(Debug, Clone)]
pub struct SyncLink {
    local_path: PathBuf,
    remote_token: ObjectToken,
    remote_type: RemoteObjectType,
    task_id: TaskId,
    last_synced_at: DateTime<Utc>,
    // Local fingerprint at last sync
    local_hash: Option<ContentHash>,
    local_size: u64,
    local_mtime: Option<DateTime<Utc>>,
    // Remote fingerprint at last sync
    remote_revision: i64,
    remote_mtime: Option<DateTime<Utc>>,
}

impl SyncLink {
    pub fn new(
        local_path: PathBuf,
        remote_token: ObjectToken,
        remote_type: RemoteObjectType,
        task_id: TaskId,
    ) -> Self {
        Self {
            local_path,
            remote_token,
            remote_type,
            task_id,
            last_synced_at: Utc::now(),
            local_hash: None,
            local_size: 0,
            local_mtime: None,
            remote_revision: 0,
            remote_mtime: None,
        }
    }

    /// Reconstructs a link from stored columns (storage layer)
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        local_path: PathBuf,
        remote_token: ObjectToken,
        remote_type: RemoteObjectType,
        task_id: TaskId,
        last_synced_at: DateTime<Utc>,
        local_hash: Option<ContentHash>,
        local_size: u64,
        local_mtime: Option<DateTime<Utc>>,
        remote_revision: i64,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            local_path,
            remote_token,
            remote_type,
            task_id,
            last_synced_at,
            local_hash,
            local_size,
            local_mtime,
            remote_revision,
            remote_mtime,
        }
    }

    // --- accessors ---

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_token(&self) -> &ObjectToken {
        &self.remote_token
    }

    pub fn remote_type(&self) -> RemoteObjectType {
        self.remote_type
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn last_synced_at(&self) -> DateTime<Utc> {
        self.last_synced_at
    }

    pub fn local_hash(&self) -> Option<&ContentHash> {
        self.local_hash.as_ref()
    }

    pub fn local_size(&self) -> u64 {
        self.local_size
    }

    pub fn local_mtime(&self) -> Option<DateTime<Utc>> {
        self.local_mtime
    }

    pub fn remote_revision(&self) -> i64 {
        self.remote_revision
    }

    pub fn remote_mtime(&self) -> Option<DateTime<Utc>> {
        self.remote_mtime
    }

    // --- fingerprint updates (last-write-wins) ---

    /// Records the local side's fingerprint after a successful transfer
    pub fn record_local(&mut self, hash: ContentHash, size: u64, mtime: DateTime<Utc>) {
        self.local_hash = Some(hash);
        self.local_size = size;
        self.local_mtime = Some(mtime);
        self.last_synced_at = Utc::now();
    }

    /// Records the remote side's fingerprint after a successful transfer
    pub fn record_remote(&mut self, revision: i64, mtime: Option<DateTime<Utc>>) {
        self.remote_revision = revision;
        self.remote_mtime = mtime;
        self.last_synced_at = Utc::now();
    }

    /// Repoints the link at a new remote token (re-created document)
    pub fn set_remote_token(&mut self, token: ObjectToken) {
        self.remote_token = token;
        self.last_synced_at = Utc::now();
    }

    // --- skip decisions ---

    /// Download can be skipped when the observed remote fingerprint matches
    /// what this link last recorded
    #[must_use]
    pub fn remote_unchanged(&self, revision: i64, mtime: Option<DateTime<Utc>>) -> bool {
        self.remote_revision == revision && self.remote_mtime == mtime
    }

    /// Upload can be skipped when the current content hash matches the
    /// recorded local hash
    #[must_use]
    pub fn local_unchanged(&self, current_hash: &ContentHash) -> bool {
        self.local_hash.as_ref() == Some(current_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::new(c.to_string().repeat(64)).unwrap()
    }

    fn make_link() -> SyncLink {
        SyncLink::new(
            PathBuf::from("/home/u/notes/a.md"),
            ObjectToken::new("doc1").unwrap(),
            RemoteObjectType::Document,
            TaskId::new(),
        )
    }

    #[test]
    fn test_remote_unchanged_matches_both_fields() {
        let mut link = make_link();
        let mtime = Utc::now();
        link.record_remote(3, Some(mtime));

        assert!(link.remote_unchanged(3, Some(mtime)));
        assert!(!link.remote_unchanged(4, Some(mtime)));
        assert!(!link.remote_unchanged(3, None));
    }

    #[test]
    fn test_local_unchanged_requires_recorded_hash() {
        let mut link = make_link();
        assert!(!link.local_unchanged(&hash('a')));

        link.record_local(hash('a'), 10, Utc::now());
        assert!(link.local_unchanged(&hash('a')));
        assert!(!link.local_unchanged(&hash('b')));
    }
}
