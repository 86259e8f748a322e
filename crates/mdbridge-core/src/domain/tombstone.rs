//! Tombstone entity - a deletion observed on one side, pending propagation
//!
//! Deletions never propagate immediately. A [`SyncTombstone`] records the
//! observation with an expiry; the delete-reconciliation pass acts on due
//! tombstones only. Re-observing a deletion refreshes the tombstone without
//! moving its clocks forward, so a flapping file cannot keep resetting its
//! own deletion countdown.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;
use super::newtypes::{ObjectToken, TaskId};

/// Which side the deletion was first observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombstoneSource {
    Local,
    Cloud,
}

/// Lifecycle of a tombstone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombstoneStatus {
    /// Waiting for its expiry before propagation is attempted
    Pending,
    /// A propagation attempt failed; retried once the backed-off expiry passes
    Failed,
    /// Propagated to the other side
    Executed,
    /// Abandoned, e.g. the path reappeared before propagation
    Cancelled,
}

/// A pending-deletion record for one task/path/remote-object triple
#[derive(Debug, Clone)]
pub struct SyncTombstone {
    id: Uuid,
    task_id: TaskId,
    local_path: PathBuf,
    remote_token: ObjectToken,
    source: TombstoneSource,
    status: TombstoneStatus,
    reason: String,
    detected_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
}

impl SyncTombstone {
    /// Creates a pending tombstone expiring after `grace`
    pub fn new(
        task_id: TaskId,
        local_path: PathBuf,
        remote_token: ObjectToken,
        source: TombstoneSource,
        reason: impl Into<String>,
        grace: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            local_path,
            remote_token,
            source,
            status: TombstoneStatus::Pending,
            reason: reason.into(),
            detected_at: now,
            expire_at: now + grace,
        }
    }

    /// Reconstructs a tombstone from stored columns (storage layer)
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        task_id: TaskId,
        local_path: PathBuf,
        remote_token: ObjectToken,
        source: TombstoneSource,
        status: TombstoneStatus,
        reason: String,
        detected_at: DateTime<Utc>,
        expire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            local_path,
            remote_token,
            source,
            status,
            reason,
            detected_at,
            expire_at,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_token(&self) -> &ObjectToken {
        &self.remote_token
    }

    pub fn source(&self) -> TombstoneSource {
        self.source
    }

    pub fn status(&self) -> TombstoneStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    /// True when this tombstone should be acted on at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            TombstoneStatus::Pending | TombstoneStatus::Failed
        ) && self.expire_at <= now
    }

    // --- transitions ---

    /// Re-observation of the same deletion: keep the earliest detection
    /// time and the earliest expiry, and fold back to Pending from Failed
    ///
    /// `detected_at` and `expire_at` never move forward here; that is the
    /// invariant that keeps a flapping file's deletion clock honest.
    pub fn refresh(&mut self, detected_at: DateTime<Utc>, expire_at: DateTime<Utc>) {
        self.detected_at = self.detected_at.min(detected_at);
        self.expire_at = self.expire_at.min(expire_at);
        if self.status == TombstoneStatus::Failed {
            self.status = TombstoneStatus::Pending;
        }
    }

    /// Marks a propagation attempt as failed, pushing the expiry out by
    /// `backoff` so the next pass retries later
    pub fn mark_failed(&mut self, reason: impl Into<String>, backoff: Duration) {
        self.status = TombstoneStatus::Failed;
        self.reason = reason.into();
        self.expire_at = Utc::now() + backoff;
    }

    /// Marks the deletion as propagated
    pub fn mark_executed(&mut self) -> Result<(), DomainError> {
        match self.status {
            TombstoneStatus::Pending | TombstoneStatus::Failed => {
                self.status = TombstoneStatus::Executed;
                Ok(())
            }
            other => Err(DomainError::InvalidTransition(format!(
                "Cannot execute tombstone in status {other:?}"
            ))),
        }
    }

    /// Abandons the tombstone (path reappeared, task deleted, ...)
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        match self.status {
            TombstoneStatus::Pending | TombstoneStatus::Failed => {
                self.status = TombstoneStatus::Cancelled;
                self.reason = reason.into();
                Ok(())
            }
            other => Err(DomainError::InvalidTransition(format!(
                "Cannot cancel tombstone in status {other:?}"
            ))),
        }
    }
}
