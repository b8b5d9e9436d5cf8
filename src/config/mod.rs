//! # Configuration Management Module
//!
//! TOML configuration for the quest engine. Every section has defaults, so a
//! partial file (or none at all, via `veramon init`) is enough to start.
//!
//! ## Configuration Structure
//!
//! - [`BotConfig`] - Display name used in announcements
//! - [`StorageConfig`] - Where the progress database lives
//! - [`QuestsConfig`] - Quest definition directory
//! - [`EventsConfig`] - Event definition directory and reporting windows
//! - [`SweepConfig`] - Background sweep intervals
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use veramon::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Quest definitions: {}", config.quests.definitions_dir);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bot]
//! name = "Veramon Reunited"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [quests]
//! definitions_dir = "./data/quests"
//!
//! [events]
//! definitions_dir = "./data/events"
//! recently_ended_hours = 72
//! ending_soon_hours = 24
//!
//! [sweeps]
//! event_sweep_secs = 60
//! refresh_sweep_secs = 300
//!
//! [logging]
//! level = "info"
//! ```

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Veramon Reunited".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Override for the sled database path; defaults to `<data_dir>/progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_db: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            progress_db: None,
        }
    }
}

impl StorageConfig {
    pub fn progress_db_path(&self) -> PathBuf {
        match &self.progress_db {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("progress"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestsConfig {
    pub definitions_dir: String,
}

impl Default for QuestsConfig {
    fn default() -> Self {
        Self {
            definitions_dir: "./data/quests".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub definitions_dir: String,
    /// How far back `status` lists ended events.
    #[serde(default = "default_recently_ended_hours")]
    pub recently_ended_hours: u32,
    /// Active events ending within this window get a one-time reminder.
    #[serde(default = "default_ending_soon_hours")]
    pub ending_soon_hours: u32,
}

fn default_recently_ended_hours() -> u32 {
    72
}

fn default_ending_soon_hours() -> u32 {
    24
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            definitions_dir: "./data/events".to_string(),
            recently_ended_hours: default_recently_ended_hours(),
            ending_soon_hours: default_ending_soon_hours(),
        }
    }
}

impl EventsConfig {
    pub fn recently_ended_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recently_ended_hours as i64)
    }

    pub fn ending_soon_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ending_soon_hours as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub event_sweep_secs: u64,
    pub refresh_sweep_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            event_sweep_secs: 60,
            refresh_sweep_secs: 300,
        }
    }
}

impl SweepConfig {
    /// Intervals below one second are clamped to one second.
    pub fn event_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.event_sweep_secs.max(1))
    }

    pub fn refresh_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.refresh_sweep_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("veramon.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quests: QuestsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sweeps: SweepConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
