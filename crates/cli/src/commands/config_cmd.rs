//! `ntbridge config`: Configuration management commands.

use ntbridge_config::BridgeConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match BridgeConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if config.hook_log {
                warnings.push("hook_log is on; every intercepted frame is logged");
            }
            if config.call.default_timeout_ms < 1000 {
                warnings.push("call.default_timeout_ms under 1 s; slow host answers will time out");
            }
            if config.store.backend == "memory" {
                warnings.push("store.backend = \"memory\"; short ids restart on every launch");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Store:     {} ({})", config.store.backend, config.store.data_dir.display());
            println!("   Timeout:   {} ms", config.call.default_timeout_ms);
            println!("   Floor:     {}", config.store.short_id_floor);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = BridgeConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = BridgeConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, BridgeConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use ntbridge_config::BridgeConfig;

    #[test]
    fn default_toml_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, BridgeConfig::default_toml()).unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.call.default_timeout_ms, 5000);
        assert_eq!(config.store.backend, "sqlite");
    }
}
