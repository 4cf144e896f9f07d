//! `ntbridge status`: Show configuration and store status.

use ntbridge_config::BridgeConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🌉 NTBridge Status");
    println!("=================");
    println!("  Config dir:     {}", BridgeConfig::config_dir().display());
    println!("  Data dir:       {}", config.store.data_dir.display());
    println!("  Store:          {}", config.store.backend);
    println!("  Hook log:       {}", if config.hook_log { "enabled" } else { "disabled" });
    println!("  Call timeout:   {} ms", config.call.default_timeout_ms);
    println!("  Cache clear:    every {} s", config.store.cache_clear_interval_secs);
    println!(
        "  Keep active:    {}",
        if config.notice.keep_chats_active { "enabled" } else { "disabled" }
    );

    let accounts = account_stores(&config.store.data_dir)?;
    if accounts.is_empty() {
        println!("\n  No account stores yet");
    } else {
        println!("\n  Account stores:");
        for (uin, size) in &accounts {
            println!("    {uin:<14} {:.1} KB", *size as f64 / 1024.0);
        }
    }

    let config_path = BridgeConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file: run `ntbridge config init` to write one");
    }

    Ok(())
}

/// `(uin, file size)` of every `msg_<uin>.sqlite` under `data_dir`.
fn account_stores(data_dir: &std::path::Path) -> std::io::Result<Vec<(String, u64)>> {
    if !data_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(uin) = name
            .strip_prefix("msg_")
            .and_then(|rest| rest.strip_suffix(".sqlite"))
        {
            out.push((uin.to_string(), entry.metadata()?.len()));
        }
    }
    out.sort();
    Ok(out)
}
