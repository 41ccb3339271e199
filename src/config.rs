//! Application configuration
//!
//! Read from `~/.config/controlmapper/config.toml`. A missing file is created
//! with defaults; an unreadable one is replaced by defaults in memory, so the
//! application always starts. Loading happens before logging is set up, so
//! the outcome is handed back as [`ConfigOrigin`] for the caller to log.

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::mapping::handle::EngineOptions;
use crate::persistence::session_store::default_sessions_root;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

const APP_DIR: &str = "controlmapper";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_SESSION: &str = "default";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Session loaded at startup
    pub session: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// 0 disables autosave
    pub autosave_interval_secs: u64,
    /// Pending inputs and requests the engine queue holds
    pub queue_capacity: usize,
    pub event_capacity: usize,
    /// Overrides the sessions directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    /// The file did not exist and was written with defaults
    Created,
    Loaded,
    /// The file could not be parsed; defaults are used in memory
    Fallback(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            session: DEFAULT_SESSION.to_string(),
            log_level: "info".to_string(),
            autosave_interval_secs: 60,
            queue_capacity: engine.queue_capacity,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            data_dir: None,
        }
    }
}

impl AppConfig {
    /// Config file in the user's config directory, or in the current
    /// directory if there is none.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }

    /// Loads the config at `path`, writing defaults there first if the file
    /// does not exist yet.
    pub async fn load_or_create(path: &Path) -> Result<(Self, ConfigOrigin)> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            let config = Self::default();
            config.save(path).await?;
            return Ok((config, ConfigOrigin::Created));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file: {}", e))?;

        Ok(match toml::from_str::<Self>(&content) {
            Ok(config) => (config, ConfigOrigin::Loaded),
            Err(e) => (Self::default(), ConfigOrigin::Fallback(e.to_string())),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Log level from `log_level`, falling back to info.
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_sessions_root)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            queue_capacity: self.queue_capacity.max(1),
            autosave_interval: (self.autosave_interval_secs > 0)
                .then(|| Duration::from_secs(self.autosave_interval_secs)),
        }
    }
}
