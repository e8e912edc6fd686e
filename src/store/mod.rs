//! # Local Storage Module
//!
//! Durable, crash-safe storage for the two documents the engine persists:
//! the resource snapshot and the pending-operation queue. Both live in one
//! SQLite database file but in separate tables, so rewriting one can never
//! clobber the other.
//!
//! ## Key Components
//!
//! - `LocalStore`: database file location, connection pool, schema init
//! - `snapshot.rs`: whole-document snapshot with TTL and quota fallback
//! - `queue.rs`: durable FIFO of not-yet-acknowledged mutations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::config::SyncConfig;
//! use fieldsync::store::LocalStore;
//!
//! # async fn open() -> Result<(), sqlx::Error> {
//! let config = SyncConfig::default();
//! let store = LocalStore::open(&config).await?;
//! let snapshots = store.snapshots(&config);
//! let queue = store.queue(&config).await?;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod snapshot;

use std::path::PathBuf;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Result as SqlxResult, SqlitePool};

pub use queue::OperationQueue;
pub use snapshot::SnapshotStore;

use crate::config::SyncConfig;

/// Local database connection manager
///
/// Opens (creating if needed) the engine's SQLite database and hands out the
/// snapshot and queue handles that share its connection pool.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open or create the local database
    ///
    /// Creates the database file if it doesn't exist and initializes the
    /// schema. Uses WAL mode for better concurrency and crash safety.
    pub async fn open(config: &SyncConfig) -> SqlxResult<Self> {
        let db_path = match &config.db_path {
            Some(path) => path.clone(),
            None => Self::default_db_path(),
        };

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA temp_store=MEMORY").execute(&pool).await?;

        let store = Self { pool };
        store.init_schema().await?;

        tracing::debug!("local store opened at {}", db_path.display());
        Ok(store)
    }

    /// Snapshot store handle sharing this database
    pub fn snapshots(&self, config: &SyncConfig) -> SnapshotStore {
        SnapshotStore::new(self.pool.clone(), config)
    }

    /// Queue handle sharing this database, with its in-memory mirror loaded
    pub async fn queue(&self, config: &SyncConfig) -> SqlxResult<OperationQueue> {
        OperationQueue::open(self.pool.clone(), config.max_retries).await
    }

    /// Raw pool access for maintenance tooling
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Platform-specific default path for the local database file
    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("fieldsync");
        path.push("local.db");
        path
    }

    /// Create all tables
    async fn init_schema(&self) -> SqlxResult<()> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Open a throwaway store in a temp directory, returning the guard that
    /// keeps the directory alive
    pub(crate) async fn temp_store(config: &mut SyncConfig) -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        config.db_path = Some(dir.path().join("test.db"));
        let store = LocalStore::open(config).await.expect("open store");
        (dir, store)
    }
}
