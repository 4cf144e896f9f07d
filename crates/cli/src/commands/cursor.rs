//! `ntbridge cursor`: Show an account's short-id cursor.

use ntbridge_config::BridgeConfig;

pub async fn run(account: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config.store, account).await?;
    let current = store.current_short_id().await?;
    let floor = config.store.short_id_floor;

    println!("🔢 Short-id cursor for account {account}");
    println!("  Current:    {current}");
    println!("  Floor:      {floor}");
    println!("  Allocated:  {}", i64::from(current) - i64::from(floor));
    println!("  Remaining:  {}", i64::from(i32::MAX) - i64::from(current));

    Ok(())
}
