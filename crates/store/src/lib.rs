//! # NTBridge Store
//!
//! Persistent message identity: every host message gets a small integer
//! short id that clients can use in place of the long host id, and that
//! survives restarts.
//!
//! ## Backends
//!
//! - **SQLite** (default): one database file per account
//! - **In-memory**: tests and throwaway sessions

pub mod identity;
pub mod in_memory;
pub mod kv;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use identity::IdentityStore;
pub use in_memory::{InMemoryKv, MemoryOpener};
pub use kv::{BackendOpener, KvStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteKv, SqliteOpener};

use ntbridge_config::StoreConfig;
use std::sync::Arc;

/// Pick the backend opener named by `config.backend`.
///
/// Unknown names fall back to memory; the config validator rejects them
/// before this point.
pub fn opener_for(config: &StoreConfig) -> Arc<dyn BackendOpener> {
    match config.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => Arc::new(SqliteOpener::new(config)),
        _ => Arc::new(MemoryOpener::new()),
    }
}
