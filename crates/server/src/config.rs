use anyhow::Result;
use creatorgate_common::AppConfig;
use std::path::PathBuf;
use tracing::info;

/// Resolved configuration with the source path for reloading.
pub struct GatewayConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self> {
        info!(path = path, "loading configuration");
        let config = AppConfig::load(path)?;
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.rate_limit.sweep_interval_secs)
    }
}
