//! Client configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/ddpsync/config.toml)
//! 3. Environment variables (DDPSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "DDPSYNC";

/// Port used when a bare hostname is configured
const DEFAULT_PORT: u16 = 80;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server address: a ws:// or wss:// URL, or a bare host[:port]
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Directory for persisted credentials
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log in with the stored resume token after each connect
    #[serde(default = "default_resume_on_connect")]
    pub resume_on_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_dir: default_data_dir(),
            resume_on_connect: default_resume_on_connect(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (DDPSYNC_SERVER_URL, DDPSYNC_DATA_DIR, DDPSYNC_RESUME_ON_CONNECT)
    /// 2. Config file (~/.config/ddpsync/config.toml or DDPSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path (from the CLI) when given
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_RESUME_ON_CONNECT", ENV_PREFIX)) {
            self.resume_on_connect = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Save configuration to a file (the default location when `path` is `None`)
    pub fn save(&self, path: Option<&PathBuf>) -> Result<()> {
        let config_path = path.cloned().unwrap_or_else(Self::config_file_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with DDPSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ddpsync")
            .join("config.toml")
    }

    /// Get the path to the credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    /// WebSocket URL of the server
    ///
    /// A bare `host` or `host:port` becomes `ws://host:port/websocket`; full
    /// URLs are returned unchanged.
    pub fn websocket_url(&self) -> String {
        let server = self.server_url.trim();
        if server.contains("://") {
            return server.to_string();
        }

        let host = server.trim_end_matches('/');
        if host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            format!("ws://{}/websocket", host)
        } else {
            format!("ws://{}:{}/websocket", host, DEFAULT_PORT)
        }
    }
}

fn default_server_url() -> String {
    "ws://localhost:3000/websocket".to_string()
}

fn default_resume_on_connect() -> bool {
    true
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ddpsync")
}
