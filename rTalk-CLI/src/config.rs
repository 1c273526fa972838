//! Configuration management for rTalk CLI.

use anyhow::{Context, Result};
use rtalk::{ChatConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RTALK_CONFIG";

/// CLI configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signed-in user.
    pub identity: Option<IdentityConfig>,
    /// Where messages live.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Conversation timeouts.
    #[serde(default)]
    pub chat: ChatSettings,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// User ID.
    pub uid: String,
}

/// Message store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process store persisted to a JSON file.
    Local {
        /// Defaults to `rtalk-data.json` next to the config file.
        data_file: Option<PathBuf>,
    },
    /// PostgREST-compatible service.
    Rest {
        url: String,
        api_key: String,
        access_token: Option<String>,
        #[serde(default)]
        echo_client_token: bool,
        poll_interval_ms: Option<u64>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local { data_file: None }
    }
}

/// Conversation timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub fetch_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub reconnect: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            send_timeout_secs: 10,
            reconnect: true,
        }
    }
}

impl ChatSettings {
    /// Library configuration for these settings.
    pub fn to_chat_config(&self) -> ChatConfig {
        ChatConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            send_timeout: Duration::from_secs(self.send_timeout_secs.max(1)),
            reconnect: if self.reconnect {
                ReconnectPolicy::default()
            } else {
                ReconnectPolicy::disabled()
            },
            ..Default::default()
        }
    }
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("Could not determine executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Could not determine executable directory")?;

    Ok(exe_dir.join("rtalk.toml"))
}

/// Load configuration from file.
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).context("Failed to read config file")?;

    toml::from_str(&content).context("Failed to parse config file")
}

/// Save configuration to file.
pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&path, content).context("Failed to write config file")?;

    Ok(())
}
