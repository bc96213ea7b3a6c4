use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::bluetooth::scanner::SVS_DEVICE_NAME;
use crate::device::controls::DEFAULT_DEBOUNCE;
use crate::device::dispatcher::DEFAULT_SETTLE_DELAY;
use crate::preset::FileStore;

/// Application configuration stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Advertised name to look for when no address is set.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Subwoofer Bluetooth address; skips scanning.
    pub device_address: Option<String>,
    /// Pause after each write while the device commits it to flash.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Quiet period before coalesced changes are sent.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Preset store file. Defaults to the user data dir.
    pub store_path: Option<PathBuf>,
    /// Now-playing watcher command line, e.g. `["watch-now-playing"]`.
    #[serde(default)]
    pub now_playing_command: Option<Vec<String>>,
}

fn default_device_name() -> String {
    SVS_DEVICE_NAME.to_string()
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY.as_millis() as u64
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_address: None,
            settle_delay_ms: default_settle_delay_ms(),
            debounce_ms: default_debounce_ms(),
            store_path: None,
            now_playing_command: None,
        }
    }
}

impl AppConfig {
    /// Config file path: ~/.config/subtune/config.toml
    pub fn path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subtune");
        config_dir.join("config.toml")
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
        }
        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(FileStore::default_path)
    }
}
