//! Configuration module
//!
//! Handles loading and saving framelink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig as ClientNetworkConfig;
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name used in log output for this client
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log filter used when RUST_LOG is unset (e.g. "info,framelink=debug")
    pub log_filter: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            verbose: false,
            log_filter: None,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in ms (0 = no timeout)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Send timeout in ms (0 = no timeout)
    #[serde(default)]
    pub send_timeout_ms: u64,
    /// Largest frame accepted or produced
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Bytes requested per socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Carry a sender id field in every frame
    #[serde(default)]
    pub include_sender_id: bool,
    /// Disable Nagle's algorithm
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            send_timeout_ms: 0,
            max_frame_size: default_max_frame_size(),
            read_buffer_size: default_read_buffer_size(),
            include_sender_id: false,
            nodelay: default_true(),
        }
    }
}

impl NetworkConfig {
    /// Settings for the client transport
    pub fn client_config(&self) -> ClientNetworkConfig {
        let non_zero = |ms: u64| if ms == 0 { None } else { Some(ms) };

        ClientNetworkConfig {
            connect_timeout_ms: non_zero(self.connect_timeout_ms),
            send_timeout_ms: non_zero(self.send_timeout_ms),
            max_frame_size: self.max_frame_size,
            read_buffer_size: self.read_buffer_size,
            include_sender_id: self.include_sender_id,
            nodelay: self.nodelay,
            ..Default::default()
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("framelink/config.toml")),
            Some(PathBuf::from("./framelink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            name: "editor-workstation".to_string(),
            verbose: false,
            log_filter: Some("info,framelink=debug".to_string()),
        },
        network: NetworkConfig {
            host: "192.168.1.4".to_string(),
            ..Default::default()
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}
