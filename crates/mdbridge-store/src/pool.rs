//! SQLite connection pool for the ledger database
//!
//! File-backed pools run in WAL mode with a busy timeout so concurrent
//! readers never block the writer. SQLite scopes `:memory:` databases per
//! connection, so the in-memory variant used by tests is pinned to one.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::StoreError;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the pool backing the ledger; the schema is applied on open
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens the ledger database at `db_path`, creating the file and its
    /// parent directories when missing
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Cannot create ledger directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Cannot open ledger at {}: {e}",
                    db_path.display()
                ))
            })?;

        Self::apply_schema(&pool).await?;
        tracing::info!(path = %db_path.display(), "Ledger database opened");
        Ok(Self { pool })
    }

    /// A throwaway single-connection in-memory ledger for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("Cannot open in-memory ledger: {e}"))
            })?;

        Self::apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying SQLite pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn apply_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("migrations/20260612_initial.sql"))
            .execute(pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("Schema migration failed: {e}")))?;
        tracing::debug!("Ledger schema applied");
        Ok(())
    }
}
