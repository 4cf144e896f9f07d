//! Key/value backing store: the persistence seam under the identity store.
//!
//! The identity store only needs string keys mapped to string values. Writes
//! must be durable by the time `put` returns; the short-id cursor relies on it.

use async_trait::async_trait;
use ntbridge_core::error::StoreError;
use std::sync::Arc;

/// The core KvStore trait.
///
/// Implementations: SQLite (default, on disk) and in-memory (tests, ephemeral runs).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Read a value.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one. Durable on return.
    async fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;

    /// Number of stored keys.
    async fn count(&self) -> std::result::Result<usize, StoreError>;
}

/// Opens the backing store for one account once its identity is known.
#[async_trait]
pub trait BackendOpener: Send + Sync {
    async fn open(&self, uin: &str) -> std::result::Result<Arc<dyn KvStore>, StoreError>;
}
