//! State repository port (driven/secondary port)
//!
//! Persistence for the four ledger entities: tasks, links, tombstones, and
//! block state. Query patterns are the ones the runner and scheduler need:
//! by local path, by task id, and "due before timestamp" for tombstones.

use std::path::Path;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    block_state::BlockStateItem,
    link::SyncLink,
    newtypes::{ObjectToken, TaskId},
    task::{Owner, SyncTask},
    tombstone::SyncTombstone,
};

/// Port trait for persistent ledger storage
///
/// Implementations must provide upsert semantics for `save_*` operations;
/// the behavioral subtleties (earliest-wins tombstone refresh, full-replace
/// block state) live in the domain entities and in
/// [`replace_block_state`](IStateRepository::replace_block_state).
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- SyncTask operations ---

    /// Saves a task (insert or update)
    async fn save_task(&self, task: &SyncTask) -> anyhow::Result<()>;

    /// Retrieves a task by id
    async fn get_task(&self, id: TaskId) -> anyhow::Result<Option<SyncTask>>;

    /// Lists all tasks belonging to an owner
    async fn list_tasks(&self, owner: &Owner) -> anyhow::Result<Vec<SyncTask>>;

    /// Deletes a task by id
    async fn delete_task(&self, id: TaskId) -> anyhow::Result<()>;

    // --- SyncLink operations ---

    /// Saves a link keyed by local path (insert or update, last-write-wins)
    async fn save_link(&self, link: &SyncLink) -> anyhow::Result<()>;

    /// Retrieves the link for a local path
    async fn get_link(&self, local_path: &Path) -> anyhow::Result<Option<SyncLink>>;

    /// Retrieves the link pointing at a remote token, if any
    async fn get_link_by_token(&self, token: &ObjectToken)
        -> anyhow::Result<Option<SyncLink>>;

    /// Lists all links owned by a task
    async fn list_links(&self, task_id: TaskId) -> anyhow::Result<Vec<SyncLink>>;

    /// Removes the link for a local path
    async fn delete_link(&self, local_path: &Path) -> anyhow::Result<()>;

    // --- Tombstone operations ---

    /// Saves a tombstone (insert or update by id)
    async fn save_tombstone(&self, tombstone: &SyncTombstone) -> anyhow::Result<()>;

    /// Retrieves the live (pending/failed) tombstone for a task + path
    async fn get_live_tombstone(
        &self,
        task_id: TaskId,
        local_path: &Path,
    ) -> anyhow::Result<Option<SyncTombstone>>;

    /// Lists a task's tombstones due at or before `before`
    /// (status pending or failed, expiry ≤ before)
    async fn list_due_tombstones(
        &self,
        task_id: TaskId,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SyncTombstone>>;

    /// Deletes a tombstone by id
    async fn delete_tombstone(&self, id: Uuid) -> anyhow::Result<()>;

    // --- Block state operations ---

    /// Retrieves a document's ordered block state (by index)
    async fn get_block_state(
        &self,
        document: &ObjectToken,
    ) -> anyhow::Result<Vec<BlockStateItem>>;

    /// Replaces a document's block state wholesale (never merged)
    async fn replace_block_state(
        &self,
        document: &ObjectToken,
        items: &[BlockStateItem],
    ) -> anyhow::Result<()>;

    /// Drops all block state for a document
    async fn clear_block_state(&self, document: &ObjectToken) -> anyhow::Result<()>;
}
