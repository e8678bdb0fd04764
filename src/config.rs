use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::identity::DEFAULT_IDENTITY_ENDPOINT;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/gbkd/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub rclone_binary: String,
    /// Falls back to the tool's own default location when unset.
    pub rclone_config: Option<PathBuf>,
    pub rpc_bind: SocketAddr,
    pub scheduler_interval_secs: u64,
    pub status_refresh_secs: u64,
    pub reconcile_secs: u64,
    pub safety_margin_gb: f64,
    pub usage_warning_percent: f64,
    pub identity_endpoint: String,
    pub identity_attempts: u32,
    /// Deadline for each hook and transfer; unset means no deadline.
    pub phase_timeout_secs: Option<u64>,
    pub log_history_limit: u32,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("gbkd.db"),
            rclone_binary: "rclone".to_string(),
            rclone_config: None,
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 7878)),
            scheduler_interval_secs: 60,
            status_refresh_secs: 300,
            reconcile_secs: 60,
            safety_margin_gb: 1.0,
            usage_warning_percent: 85.0,
            identity_endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            identity_attempts: 3,
            phase_timeout_secs: None,
            log_history_limit: 200,
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Merge defaults, the config file, `GBKD_*` variables and CLI overrides,
    /// in that order of increasing precedence.
    pub fn new<T: Serialize>(file: Option<PathBuf>, overrides: Option<&T>) -> Result<Self> {
        let explicit = file.is_some();
        let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if explicit && !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GBKD_"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::globals(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler_interval_secs == 0 || self.status_refresh_secs == 0 || self.reconcile_secs == 0 {
            anyhow::bail!("polling intervals must be at least one second");
        }
        if self.rclone_binary.trim().is_empty() {
            anyhow::bail!("rclone_binary must not be empty");
        }
        Ok(())
    }

    /// The tool's profile file: the configured one, or the tool's default.
    pub fn rclone_config_path(&self) -> Option<PathBuf> {
        self.rclone_config
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("rclone").join("rclone.conf")))
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn status_refresh(&self) -> Duration {
        Duration::from_secs(self.status_refresh_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_secs)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    /// The merged configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
