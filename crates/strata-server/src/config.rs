//! Configuration for the strata server.
//!
//! Loads configuration from a TOML file at `~/.config/strata/config.toml`.
//! Auto-generates the default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket: SocketConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
    pub headless: HeadlessConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Listening socket path. Defaults to `strata.sock` in the runtime
    /// directory; the `STRATA_SOCKET` environment variable overrides both.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Capacity of the shared request queue feeding the compositor.
    pub request_queue: usize,
    /// Capacity of each client's reply and event channels. A client that
    /// lets either fill up is dropped.
    pub client_channel: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_queue: 1024,
            client_channel: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log file used when the server owns the terminal (stderr would be
    /// drawn over). Defaults to `strata.log` next to the socket.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Emulated grid size for `--headless` runs.
    pub width: i32,
    pub height: i32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if the file doesn't
    /// exist.
    pub fn load() -> Result<Self> {
        let Some(config_path) = Self::config_path() else {
            return Ok(Self::default());
        };

        if !config_path.exists() {
            if let Err(e) = Self::save_default(&config_path) {
                warn!("failed to create default config file: {e}");
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("failed to read config file")?;
        let config: Config = toml::from_str(&content).context("failed to parse config file")?;
        Ok(config)
    }

    pub fn socket_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var("STRATA_SOCKET") {
            return PathBuf::from(path);
        }
        self.socket
            .path
            .clone()
            .unwrap_or_else(strata_ipc::socket_path)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log
            .file
            .clone()
            .unwrap_or_else(|| strata_ipc::socket_path().with_file_name("strata.log"))
    }

    fn config_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("strata").join("config.toml"))
    }

    fn save_default(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let toml_string =
            toml::to_string_pretty(&Self::default()).context("failed to serialize config")?;
        fs::write(path, toml_string).context("failed to write config file")?;
        Ok(())
    }
}
