//! `streamloop config`: configuration management commands.

use streamloop_config::AppConfig;

/// Print the default configuration, ready to save as `config.toml`.
pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(&config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            if config.has_api_key() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                println!(
                    "   ⚠️  No API key set (set STREAMLOOP_API_KEY or {})",
                    config.provider.api_key_env()
                );
            }

            println!();
            println!("   Provider:  {}", config.provider);
            println!("   Model:     {}", config.effective_model());
            if let Some(url) = &config.base_url {
                println!("   Base URL:  {url}");
            }
            println!("   Max iter:  {}", config.budget.max_iterations);
            if let Some(tokens) = config.budget.token_budget {
                println!("   Tokens:    {tokens}");
            }
            if let Some(usd) = config.budget.cost_budget_usd {
                println!("   Cost:      ${usd:.4}");
            }
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// TOML for the config with the API key masked.
fn render_redacted(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&config)
}
