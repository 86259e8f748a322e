//! Sync task entity
//!
//! A [`SyncTask`] pairs a local directory tree with a remote folder and
//! carries the per-task policy knobs: direction, markdown handling,
//! document update strategy, and deletion policy. Tasks are created and
//! edited by the API layer (outside this workspace); the runner and
//! scheduler only read them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ObjectToken, TaskId};

// ============================================================================
// Policy enums
// ============================================================================

/// Which way content flows for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Bidirectional,
    UploadOnly,
    DownloadOnly,
}

impl SyncDirection {
    /// True when the download pass should run for this task
    #[must_use]
    pub fn allows_download(self) -> bool {
        matches!(self, Self::Bidirectional | Self::DownloadOnly)
    }

    /// True when the upload pass should run for this task
    #[must_use]
    pub fn allows_upload(self) -> bool {
        matches!(self, Self::Bidirectional | Self::UploadOnly)
    }
}

/// How Markdown files are treated on upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkdownMode {
    /// Convert to a remote document and keep a raw Markdown mirror copy
    /// in a dedicated subfolder next to it
    Enhanced,
    /// Never upload Markdown; files flow downward only
    DownloadOnly,
    /// Convert to a remote document without keeping a mirror copy
    DocOnly,
}

/// Strategy for pushing document edits to the remote block tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocUpdateMode {
    /// Partial when a linked document exists, full otherwise
    Auto,
    /// Always replace the whole document
    Full,
    /// Always attempt a block-level partial patch
    Partial,
}

/// How deletions observed on one side propagate to the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Hold a tombstone for the grace period before propagating
    Safe,
    /// Propagate on the next delete-reconciliation pass, no grace
    Strict,
}

/// Identity that scopes task visibility when several devices or accounts
/// share one ledger database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub device_id: String,
    pub account_id: String,
}

impl Owner {
    pub fn new(device_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            account_id: account_id.into(),
        }
    }
}

// ============================================================================
// SyncTask
// ============================================================================

/// A configured pairing of a local directory and a remote folder
#[derive(Debug, Clone)]
pub struct SyncTask {
    id: TaskId,
    name: String,
    local_root: PathBuf,
    remote_folder: ObjectToken,
    direction: SyncDirection,
    markdown_mode: MarkdownMode,
    doc_update_mode: DocUpdateMode,
    delete_policy: DeletePolicy,
    /// Grace period (seconds) before a Safe-policy tombstone becomes due
    delete_grace_secs: u64,
    enabled: bool,
    owner: Owner,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SyncTask {
    /// Creates a new task, validating the local root
    ///
    /// The local root must be an absolute path. Overlap against other tasks
    /// is checked separately via [`SyncTask::ensure_no_overlap`] because it
    /// needs the full set of the owner's enabled tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        local_root: PathBuf,
        remote_folder: ObjectToken,
        direction: SyncDirection,
        markdown_mode: MarkdownMode,
        doc_update_mode: DocUpdateMode,
        delete_policy: DeletePolicy,
        delete_grace_secs: u64,
        owner: Owner,
    ) -> Result<Self, DomainError> {
        if !local_root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Task local root must be absolute: {}",
                local_root.display()
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            name: name.into(),
            local_root,
            remote_folder,
            direction,
            markdown_mode,
            doc_update_mode,
            delete_policy,
            delete_grace_secs,
            enabled: true,
            owner,
            created_at: now,
            updated_at: now,
        })
    }

    /// Reconstructs a task with a known id and timestamps (storage layer)
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: TaskId,
        name: String,
        local_root: PathBuf,
        remote_folder: ObjectToken,
        direction: SyncDirection,
        markdown_mode: MarkdownMode,
        doc_update_mode: DocUpdateMode,
        delete_policy: DeletePolicy,
        delete_grace_secs: u64,
        enabled: bool,
        owner: Owner,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            local_root,
            remote_folder,
            direction,
            markdown_mode,
            doc_update_mode,
            delete_policy,
            delete_grace_secs,
            enabled,
            owner,
            created_at,
            updated_at,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_folder(&self) -> &ObjectToken {
        &self.remote_folder
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn markdown_mode(&self) -> MarkdownMode {
        self.markdown_mode
    }

    pub fn doc_update_mode(&self) -> DocUpdateMode {
        self.doc_update_mode
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Grace period before tombstone propagation; zero under Strict policy
    pub fn delete_grace(&self) -> chrono::Duration {
        match self.delete_policy {
            DeletePolicy::Safe => chrono::Duration::seconds(self.delete_grace_secs as i64),
            DeletePolicy::Strict => chrono::Duration::zero(),
        }
    }

    pub fn delete_grace_secs(&self) -> u64 {
        self.delete_grace_secs
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // --- mutation ---

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.updated_at = Utc::now();
    }

    // ========================================================================
    // Overlap validation
    // ========================================================================

    /// Rejects this task if it overlaps an existing enabled task of the
    /// same owner
    ///
    /// Overlap means equal local roots, one root nested under the other,
    /// or the same remote folder token. Disabled tasks and other owners'
    /// tasks are ignored.
    pub fn ensure_no_overlap(&self, existing: &[SyncTask]) -> Result<(), DomainError> {
        for other in existing {
            if other.id == self.id || !other.enabled || other.owner != self.owner {
                continue;
            }

            if paths_overlap(&self.local_root, &other.local_root) {
                return Err(DomainError::TaskOverlap {
                    other: other.name.clone(),
                    reason: format!(
                        "local roots overlap: {} vs {}",
                        self.local_root.display(),
                        other.local_root.display()
                    ),
                });
            }

            if self.remote_folder == other.remote_folder {
                return Err(DomainError::TaskOverlap {
                    other: other.name.clone(),
                    reason: format!("remote folder {} already in use", self.remote_folder),
                });
            }
        }
        Ok(())
    }
}

/// True when the paths are equal or one is an ancestor of the other
fn paths_overlap(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}
