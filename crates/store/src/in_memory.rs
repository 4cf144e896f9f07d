//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use ntbridge_core::error::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::kv::{BackendOpener, KvStore};

/// An in-memory backend that stores entries in a HashMap.
///
/// Clones share the same entries, so dropping one handle and building a new
/// identity store over a clone behaves like a process restart.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    entries: Arc<RwLock<HashMap<String, String>>>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many `get` calls reached this backend.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}

/// Opens one shared in-memory backend per account.
#[derive(Default)]
pub struct MemoryOpener {
    accounts: std::sync::Mutex<HashMap<String, InMemoryKv>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackendOpener for MemoryOpener {
    async fn open(&self, uin: &str) -> Result<Arc<dyn KvStore>, StoreError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| StoreError::Storage("memory opener lock poisoned".into()))?;
        let kv = accounts.entry(uin.to_string()).or_default().clone();
        Ok(Arc::new(kv))
    }
}
