//! SQLite implementation of IStateRepository
//!
//! Concrete SQLite-based implementation of the state repository port
//! defined in mdbridge-core. Handles all domain type serialization and SQL
//! query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                                  |
//! |------------------|----------|-------------------------------------------|
//! | TaskId, Uuid     | TEXT     | UUID string via `.to_string()` / `FromStr`|
//! | ObjectToken      | TEXT     | String via `.as_str()` / `ObjectToken::new()` |
//! | ContentHash      | TEXT     | Hex string via `.as_str()` / `ContentHash::new()` |
//! | PathBuf          | TEXT     | Lossy UTF-8 path string                   |
//! | DateTime<Utc>    | TEXT     | ISO 8601 via `to_rfc3339()`               |
//! | policy enums     | TEXT     | snake_case strings, mapped by hand        |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mdbridge_core::domain::{
    block_state::BlockStateItem,
    link::{RemoteObjectType, SyncLink},
    newtypes::{ContentHash, ObjectToken, TaskId},
    task::{DeletePolicy, DocUpdateMode, MarkdownMode, Owner, SyncDirection, SyncTask},
    tombstone::{SyncTombstone, TombstoneSource, TombstoneStatus},
};
use mdbridge_core::ports::IStateRepository;

use crate::StoreError;

/// SQLite-based implementation of the state repository port
///
/// All operations go through a connection pool for concurrency; the pool
/// (WAL mode) is the single serialization point for ledger writes.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn direction_to_string(d: SyncDirection) -> &'static str {
    match d {
        SyncDirection::Bidirectional => "bidirectional",
        SyncDirection::UploadOnly => "upload_only",
        SyncDirection::DownloadOnly => "download_only",
    }
}

fn direction_from_string(s: &str) -> Result<SyncDirection, StoreError> {
    match s {
        "bidirectional" => Ok(SyncDirection::Bidirectional),
        "upload_only" => Ok(SyncDirection::UploadOnly),
        "download_only" => Ok(SyncDirection::DownloadOnly),
        other => Err(StoreError::SerializationError(format!(
            "Unknown sync direction: {}",
            other
        ))),
    }
}

fn markdown_mode_to_string(m: MarkdownMode) -> &'static str {
    match m {
        MarkdownMode::Enhanced => "enhanced",
        MarkdownMode::DownloadOnly => "download_only",
        MarkdownMode::DocOnly => "doc_only",
    }
}

fn markdown_mode_from_string(s: &str) -> Result<MarkdownMode, StoreError> {
    match s {
        "enhanced" => Ok(MarkdownMode::Enhanced),
        "download_only" => Ok(MarkdownMode::DownloadOnly),
        "doc_only" => Ok(MarkdownMode::DocOnly),
        other => Err(StoreError::SerializationError(format!(
            "Unknown markdown mode: {}",
            other
        ))),
    }
}

fn doc_update_mode_to_string(m: DocUpdateMode) -> &'static str {
    match m {
        DocUpdateMode::Auto => "auto",
        DocUpdateMode::Full => "full",
        DocUpdateMode::Partial => "partial",
    }
}

fn doc_update_mode_from_string(s: &str) -> Result<DocUpdateMode, StoreError> {
    match s {
        "auto" => Ok(DocUpdateMode::Auto),
        "full" => Ok(DocUpdateMode::Full),
        "partial" => Ok(DocUpdateMode::Partial),
        other => Err(StoreError::SerializationError(format!(
            "Unknown doc update mode: {}",
            other
        ))),
    }
}

fn delete_policy_to_string(p: DeletePolicy) -> &'static str {
    match p {
        DeletePolicy::Safe => "safe",
        DeletePolicy::Strict => "strict",
    }
}

fn delete_policy_from_string(s: &str) -> Result<DeletePolicy, StoreError> {
    match s {
        "safe" => Ok(DeletePolicy::Safe),
        "strict" => Ok(DeletePolicy::Strict),
        other => Err(StoreError::SerializationError(format!(
            "Unknown delete policy: {}",
            other
        ))),
    }
}

fn remote_type_to_string(t: RemoteObjectType) -> &'static str {
    match t {
        RemoteObjectType::Document => "document",
        RemoteObjectType::Sheet => "sheet",
        RemoteObjectType::Base => "base",
        RemoteObjectType::Folder => "folder",
        RemoteObjectType::File => "file",
        RemoteObjectType::MarkdownMirror => "markdown_mirror",
    }
}

fn remote_type_from_string(s: &str) -> Result<RemoteObjectType, StoreError> {
    match s {
        "document" => Ok(RemoteObjectType::Document),
        "sheet" => Ok(RemoteObjectType::Sheet),
        "base" => Ok(RemoteObjectType::Base),
        "folder" => Ok(RemoteObjectType::Folder),
        "file" => Ok(RemoteObjectType::File),
        "markdown_mirror" => Ok(RemoteObjectType::MarkdownMirror),
        other => Err(StoreError::SerializationError(format!(
            "Unknown remote object type: {}",
            other
        ))),
    }
}

fn tombstone_source_to_string(s: TombstoneSource) -> &'static str {
    match s {
        TombstoneSource::Local => "local",
        TombstoneSource::Cloud => "cloud",
    }
}

fn tombstone_source_from_string(s: &str) -> Result<TombstoneSource, StoreError> {
    match s {
        "local" => Ok(TombstoneSource::Local),
        "cloud" => Ok(TombstoneSource::Cloud),
        other => Err(StoreError::SerializationError(format!(
            "Unknown tombstone source: {}",
            other
        ))),
    }
}

fn tombstone_status_to_string(s: TombstoneStatus) -> &'static str {
    match s {
        TombstoneStatus::Pending => "pending",
        TombstoneStatus::Failed => "failed",
        TombstoneStatus::Executed => "executed",
        TombstoneStatus::Cancelled => "cancelled",
    }
}

fn tombstone_status_from_string(s: &str) -> Result<TombstoneStatus, StoreError> {
    match s {
        "pending" => Ok(TombstoneStatus::Pending),
        "failed" => Ok(TombstoneStatus::Failed),
        "executed" => Ok(TombstoneStatus::Executed),
        "cancelled" => Ok(TombstoneStatus::Cancelled),
        other => Err(StoreError::SerializationError(format!(
            "Unknown tombstone status: {}",
            other
        ))),
    }
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_token(s: &str) -> Result<ObjectToken, StoreError> {
    ObjectToken::new(s)
        .map_err(|e| StoreError::SerializationError(format!("Invalid object token '{s}': {e}")))
}

fn parse_task_id(s: &str) -> Result<TaskId, StoreError> {
    TaskId::from_str(s)
        .map_err(|e| StoreError::SerializationError(format!("Invalid task id '{s}': {e}")))
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn task_from_row(row: &SqliteRow) -> Result<SyncTask, StoreError> {
    let id_str: String = row.get("id");
    let name: String = row.get("name");
    let local_root: String = row.get("local_root");
    let remote_folder: String = row.get("remote_folder");
    let direction: String = row.get("direction");
    let markdown_mode: String = row.get("markdown_mode");
    let doc_update_mode: String = row.get("doc_update_mode");
    let delete_policy: String = row.get("delete_policy");
    let delete_grace_secs: i64 = row.get("delete_grace_secs");
    let enabled: i64 = row.get("enabled");
    let device_id: String = row.get("device_id");
    let account_id: String = row.get("account_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SyncTask::restore(
        parse_task_id(&id_str)?,
        name,
        PathBuf::from(local_root),
        parse_token(&remote_folder)?,
        direction_from_string(&direction)?,
        markdown_mode_from_string(&markdown_mode)?,
        doc_update_mode_from_string(&doc_update_mode)?,
        delete_policy_from_string(&delete_policy)?,
        delete_grace_secs as u64,
        enabled != 0,
        Owner::new(device_id, account_id),
        parse_datetime(&created_at)?,
        parse_datetime(&updated_at)?,
    ))
}

fn link_from_row(row: &SqliteRow) -> Result<SyncLink, StoreError> {
    let local_path: String = row.get("local_path");
    let remote_token: String = row.get("remote_token");
    let remote_type: String = row.get("remote_type");
    let task_id: String = row.get("task_id");
    let last_synced_at: String = row.get("last_synced_at");
    let local_hash: Option<String> = row.get("local_hash");
    let local_size: i64 = row.get("local_size");
    let local_mtime: Option<String> = row.get("local_mtime");
    let remote_revision: i64 = row.get("remote_revision");
    let remote_mtime: Option<String> = row.get("remote_mtime");

    let local_hash = match local_hash {
        Some(ref h) if !h.is_empty() => Some(ContentHash::new(h.clone()).map_err(|e| {
            StoreError::SerializationError(format!("Invalid content hash '{h}': {e}"))
        })?),
        _ => None,
    };

    Ok(SyncLink::restore(
        PathBuf::from(local_path),
        parse_token(&remote_token)?,
        remote_type_from_string(&remote_type)?,
        parse_task_id(&task_id)?,
        parse_datetime(&last_synced_at)?,
        local_hash,
        local_size as u64,
        parse_optional_datetime(local_mtime)?,
        remote_revision,
        parse_optional_datetime(remote_mtime)?,
    ))
}

fn tombstone_from_row(row: &SqliteRow) -> Result<SyncTombstone, StoreError> {
    let id: String = row.get("id");
    let task_id: String = row.get("task_id");
    let local_path: String = row.get("local_path");
    let remote_token: String = row.get("remote_token");
    let source: String = row.get("source");
    let status: String = row.get("status");
    let reason: String = row.get("reason");
    let detected_at: String = row.get("detected_at");
    let expire_at: String = row.get("expire_at");

    let id = Uuid::parse_str(&id)
        .map_err(|e| StoreError::SerializationError(format!("Invalid tombstone id '{id}': {e}")))?;

    Ok(SyncTombstone::restore(
        id,
        parse_task_id(&task_id)?,
        PathBuf::from(local_path),
        parse_token(&remote_token)?,
        tombstone_source_from_string(&source)?,
        tombstone_status_from_string(&status)?,
        reason,
        parse_datetime(&detected_at)?,
        parse_datetime(&expire_at)?,
    ))
}

fn block_state_from_row(row: &SqliteRow) -> Result<BlockStateItem, StoreError> {
    let document: String = row.get("document");
    let block_index: i64 = row.get("block_index");
    let hash: String = row.get("hash");
    let total_blocks: i64 = row.get("total_blocks");

    let hash = ContentHash::new(hash.clone())
        .map_err(|e| StoreError::SerializationError(format!("Invalid block hash '{hash}': {e}")))?;

    Ok(BlockStateItem::new(
        parse_token(&document)?,
        block_index as u32,
        hash,
        total_blocks as u32,
    ))
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- SyncTask operations ---

    async fn save_task(&self, task: &SyncTask) -> anyhow::Result<()> {
        // Overlap is re-validated at the persistence boundary so a stale
        // caller cannot store two tasks fighting over the same tree
        let existing = self.list_tasks(task.owner()).await?;
        task.ensure_no_overlap(&existing)?;

        let id = task.id().to_string();

        sqlx::query(
            "INSERT OR REPLACE INTO sync_tasks \
             (id, name, local_root, remote_folder, direction, markdown_mode, \
              doc_update_mode, delete_policy, delete_grace_secs, enabled, \
              device_id, account_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task.name())
        .bind(path_to_string(task.local_root()))
        .bind(task.remote_folder().as_str())
        .bind(direction_to_string(task.direction()))
        .bind(markdown_mode_to_string(task.markdown_mode()))
        .bind(doc_update_mode_to_string(task.doc_update_mode()))
        .bind(delete_policy_to_string(task.delete_policy()))
        .bind(task.delete_grace_secs() as i64)
        .bind(i64::from(task.is_enabled()))
        .bind(&task.owner().device_id)
        .bind(&task.owner().account_id)
        .bind(task.created_at().to_rfc3339())
        .bind(task.updated_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(task_id = %id, "Saved sync task");
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> anyhow::Result<Option<SyncTask>> {
        let row = sqlx::query("SELECT * FROM sync_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(task_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, owner: &Owner) -> anyhow::Result<Vec<SyncTask>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_tasks WHERE device_id = ? AND account_id = ? \
             ORDER BY created_at ASC",
        )
        .bind(&owner.device_id)
        .bind(&owner.account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(task_from_row(row)?);
        }
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(task_id = %id, "Deleted sync task");
        Ok(())
    }

    // --- SyncLink operations ---

    async fn save_link(&self, link: &SyncLink) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_links \
             (local_path, remote_token, remote_type, task_id, last_synced_at, \
              local_hash, local_size, local_mtime, remote_revision, remote_mtime) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(path_to_string(link.local_path()))
        .bind(link.remote_token().as_str())
        .bind(remote_type_to_string(link.remote_type()))
        .bind(link.task_id().to_string())
        .bind(link.last_synced_at().to_rfc3339())
        .bind(link.local_hash().map(|h| h.as_str().to_string()))
        .bind(link.local_size() as i64)
        .bind(link.local_mtime().map(|dt| dt.to_rfc3339()))
        .bind(link.remote_revision())
        .bind(link.remote_mtime().map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(path = %link.local_path().display(), "Saved sync link");
        Ok(())
    }

    async fn get_link(&self, local_path: &Path) -> anyhow::Result<Option<SyncLink>> {
        let row = sqlx::query("SELECT * FROM sync_links WHERE local_path = ?")
            .bind(path_to_string(local_path))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(link_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_link_by_token(
        &self,
        token: &ObjectToken,
    ) -> anyhow::Result<Option<SyncLink>> {
        let row = sqlx::query("SELECT * FROM sync_links WHERE remote_token = ?")
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(link_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_links(&self, task_id: TaskId) -> anyhow::Result<Vec<SyncLink>> {
        let rows = sqlx::query("SELECT * FROM sync_links WHERE task_id = ? ORDER BY local_path")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in &rows {
            links.push(link_from_row(row)?);
        }
        Ok(links)
    }

    async fn delete_link(&self, local_path: &Path) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_links WHERE local_path = ?")
            .bind(path_to_string(local_path))
            .execute(&self.pool)
            .await?;

        tracing::trace!(path = %local_path.display(), "Deleted sync link");
        Ok(())
    }

    // --- Tombstone operations ---

    async fn save_tombstone(&self, tombstone: &SyncTombstone) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_tombstones \
             (id, task_id, local_path, remote_token, source, status, reason, \
              detected_at, expire_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tombstone.id().to_string())
        .bind(tombstone.task_id().to_string())
        .bind(path_to_string(tombstone.local_path()))
        .bind(tombstone.remote_token().as_str())
        .bind(tombstone_source_to_string(tombstone.source()))
        .bind(tombstone_status_to_string(tombstone.status()))
        .bind(tombstone.reason())
        .bind(tombstone.detected_at().to_rfc3339())
        .bind(tombstone.expire_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(id = %tombstone.id(), "Saved tombstone");
        Ok(())
    }

    async fn get_live_tombstone(
        &self,
        task_id: TaskId,
        local_path: &Path,
    ) -> anyhow::Result<Option<SyncTombstone>> {
        let row = sqlx::query(
            "SELECT * FROM sync_tombstones \
             WHERE task_id = ? AND local_path = ? AND status IN ('pending', 'failed') \
             ORDER BY detected_at ASC LIMIT 1",
        )
        .bind(task_id.to_string())
        .bind(path_to_string(local_path))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(tombstone_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_due_tombstones(
        &self,
        task_id: TaskId,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SyncTombstone>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_tombstones \
             WHERE task_id = ? AND status IN ('pending', 'failed') AND expire_at <= ? \
             ORDER BY expire_at ASC",
        )
        .bind(task_id.to_string())
        .bind(before.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut tombstones = Vec::with_capacity(rows.len());
        for row in &rows {
            tombstones.push(tombstone_from_row(row)?);
        }
        Ok(tombstones)
    }

    async fn delete_tombstone(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_tombstones WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(id = %id, "Deleted tombstone");
        Ok(())
    }

    // --- Block state operations ---

    async fn get_block_state(
        &self,
        document: &ObjectToken,
    ) -> anyhow::Result<Vec<BlockStateItem>> {
        let rows =
            sqlx::query("SELECT * FROM block_state WHERE document = ? ORDER BY block_index ASC")
                .bind(document.as_str())
                .fetch_all(&self.pool)
                .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(block_state_from_row(row)?);
        }
        Ok(items)
    }

    async fn replace_block_state(
        &self,
        document: &ObjectToken,
        items: &[BlockStateItem],
    ) -> anyhow::Result<()> {
        // The old list must disappear entirely before the new one lands;
        // a merged remainder would poison later diffs.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM block_state WHERE document = ?")
            .bind(document.as_str())
            .execute(&mut *tx)
            .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO block_state (document, block_index, hash, total_blocks) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(item.document.as_str())
            .bind(item.index as i64)
            .bind(item.hash.as_str())
            .bind(item.total_blocks as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::trace!(
            document = %document,
            blocks = items.len(),
            "Replaced block state"
        );
        Ok(())
    }

    async fn clear_block_state(&self, document: &ObjectToken) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM block_state WHERE document = ?")
            .bind(document.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
