//! SQLite backend for the identity store.
//!
//! One database file per account with a single table:
//! - `kv`: `key TEXT PRIMARY KEY, value TEXT`
//!
//! The journal runs in WAL mode with `synchronous = FULL`, so a `put` that
//! returned survives a crash of the process.

use async_trait::async_trait;
use ntbridge_config::StoreConfig;
use ntbridge_core::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::kv::{BackendOpener, KvStore};

/// A durable SQLite key/value backend.
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;
        // Every connection to ":memory:" is its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let backend = Self::connect(options, max_connections).await?;
        info!("SQLite identity store initialized at {path}");
        Ok(backend)
    }

    /// Open the database file at `path`, creating parent directories.
    pub async fn open_file(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create data directory: {e}"))
            })?;
        }
        let backend = Self::connect(SqliteConnectOptions::new().filename(path), 4).await?;
        info!("SQLite identity store initialized at {}", path.display());
        Ok(backend)
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("kv table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("SELECT {key} failed: {e}")))?;

        row.map(|r| {
            r.try_get::<String, _>("value")
                .map_err(|e| StoreError::Storage(format!("value column: {e}")))
        })
        .transpose()
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT {key} failed: {e}")))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("COUNT failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Storage(format!("count column: {e}")))?;
        Ok(n as usize)
    }
}

/// Opens `msg_<uin>.sqlite` under the configured data directory.
pub struct SqliteOpener {
    config: StoreConfig,
}

impl SqliteOpener {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl BackendOpener for SqliteOpener {
    async fn open(&self, uin: &str) -> Result<Arc<dyn KvStore>, StoreError> {
        let path = self.config.account_db_path(uin);
        Ok(Arc::new(SqliteKv::open_file(&path).await?))
    }
}
