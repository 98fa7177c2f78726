//! Configuration management for Syndicast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    pub vault: Option<VaultConfig>,
    pub mastodon: Option<MastodonConfig>,
    pub twitter: Option<OAuthAppConfig>,
    pub facebook: Option<OAuthAppConfig>,
    pub linkedin: Option<OAuthAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Scheduler and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between queue polls in the worker daemon.
    pub poll_interval: u64,
    /// Maximum failed publish attempts before a post is terminally failed.
    pub retry_cap: u32,
    /// Base delay for exponential backoff between retries, in seconds.
    pub backoff_base_secs: u64,
    /// How long a claimed job stays invisible to other workers, in seconds.
    /// A worker that crashes mid-job loses its claim after this window and
    /// the job is requeued.
    pub visibility_timeout_secs: i64,
    /// Maximum jobs executing concurrently in one worker process.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            retry_cap: 3,
            backoff_base_secs: 60,
            visibility_timeout_secs: 300,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Safety margin before credential expiry that triggers a proactive
    /// refresh, in seconds.
    pub refresh_buffer_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Per-attempt delivery timeout, in seconds.
    pub attempt_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// File containing the vault passphrase (mode 600).
    pub passphrase_file: String,
}

impl VaultConfig {
    pub fn expand_passphrase_file_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.passphrase_file)
            .map_err(|e| ConfigError::MissingField(format!("vault.passphrase_file: {}", e)))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    /// Instance base URL, e.g. "https://mastodon.social".
    pub instance: String,
}

/// OAuth application credentials for platforms that require a confidential
/// client for token refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndicast/syndicast.db".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            tokens: TokenConfig::default(),
            webhooks: WebhookConfig::default(),
            vault: Some(VaultConfig {
                passphrase_file: "~/.config/syndicast/vault.passphrase".to_string(),
            }),
            mastodon: None,
            twitter: None,
            facebook: None,
            linkedin: None,
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndicast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("syndicast"))
}
