use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Load and validate configuration from a file using the config crate.
/// Supports YAML (default), JSON and TOML, picked by extension.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_unchecked(config_path).await?;
    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration without validation (used by the validate command)
pub async fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    let path = config_path.to_string();
    tokio::task::spawn_blocking(move || load_config_sync(&path))
        .await
        .wrap_err("Configuration loader task failed")?
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}
