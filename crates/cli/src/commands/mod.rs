pub mod config_cmd;
pub mod cursor;
pub mod lookup;
pub mod status;

use ntbridge_config::StoreConfig;
use ntbridge_store::{IdentityStore, SqliteKv};
use std::sync::Arc;

/// Open an account's existing store read-side. Never creates a new file.
pub async fn open_store(
    config: &StoreConfig,
    account: &str,
) -> Result<IdentityStore, Box<dyn std::error::Error>> {
    if config.backend != "sqlite" {
        return Err(format!(
            "store backend \"{}\" keeps nothing between runs; nothing to inspect",
            config.backend
        )
        .into());
    }

    let path = config.account_db_path(account);
    if !path.exists() {
        return Err(format!("no store for account {account} at {}", path.display()).into());
    }

    let backend = SqliteKv::open_file(&path).await?;
    Ok(IdentityStore::with_backend(
        Arc::new(backend),
        config.short_id_floor,
    ))
}
