//! `ntbridge lookup`: Find a captured message.

use ntbridge_config::BridgeConfig;
use ntbridge_core::error::StoreError;
use ntbridge_core::message::MessageRecord;
use ntbridge_store::IdentityStore;
use std::sync::Arc;

/// Which identifier to look the message up by.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Short(i32),
    Long(String),
    Sequence(String),
}

pub async fn find(store: &IdentityStore, target: &Target) -> Result<Arc<MessageRecord>, StoreError> {
    match target {
        Target::Short(id) => store.find_by_short(*id).await,
        Target::Long(id) => store.find_by_long(id).await,
        Target::Sequence(seq) => store.find_by_sequence(seq).await,
    }
}

pub async fn run(account: &str, target: Target) -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config.store, account).await?;

    match find(&store, &target).await {
        Ok(record) => {
            println!("🔎 Message {:?} in account {account}", target);
            println!("  Long id:   {}", record.msg_id);
            println!(
                "  Short id:  {}",
                record.msg_short_id.map(|id| id.to_string()).unwrap_or_default()
            );
            println!("  Sequence:  {}", record.msg_seq.as_deref().unwrap_or("-"));
            println!();
            println!("{}", serde_json::to_string_pretty(&*record)?);
        }
        Err(e) if e.is_not_found() => {
            println!("  ⚠️  No message for {:?} in account {account}", target);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
