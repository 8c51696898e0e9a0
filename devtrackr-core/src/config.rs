use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::poller::PollConfig;

const APP_DIR: &str = "devtrackr";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JiraConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub default_interval_minutes: u64,
    pub tick_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `devtrackr.db`; platform data dir when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: "https://issues.redhat.com".to_owned(),
            request_timeout_seconds: 10,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: 5,
            tick_seconds: 60,
        }
    }
}

impl JiraConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl PollingConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            default_interval: Duration::from_secs(self.default_interval_minutes.saturating_mul(60)),
            tick: Duration::from_secs(self.tick_seconds.max(1)),
        }
    }
}

impl StorageConfig {
    pub fn store_path(&self) -> PathBuf {
        let dir = self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        dir.join("devtrackr.db")
    }
}

impl AppConfig {
    /// `<config_dir>/devtrackr/config.json`
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    /// Loads the default config file, falling back to (and trying to write)
    /// the defaults when it is missing or unreadable.
    pub fn load() -> Self {
        let loaded = Self::config_file_path().and_then(|path| Self::load_from(&path));
        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "could not load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "could not save default configuration");
                }
                default_config
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
