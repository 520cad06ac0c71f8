use crate::common::config_directory;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

const CONFIG_FILE_NAME: &str = "config.json";

/// Whether the instance lock and signal channel are confined to the login session
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One instance per login session, the default
    #[default]
    Session,
    /// One instance across every session on the machine.
    ///
    /// Exclusion covers the whole system on every platform. Waking the running instance does
    /// not: on Windows the show request is a window message broadcast, which only reaches
    /// windows on the caller's desktop, so a launch from another session is refused without
    /// bringing the primary forward.
    System,
}

#[derive(Debug, Deserialize, Serialize, Validate, Clone, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub scope: Scope,
    /// Directory holding the lock and channel files, overriding the per scope default
    pub runtime_dir: Option<PathBuf>,
    #[validate(range(min = 1, max = 20))]
    pub delivery_attempts: u32,
    #[validate(range(max = 1000))]
    pub delivery_retry_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            scope: Scope::Session,
            runtime_dir: None,
            delivery_attempts: 3,
            delivery_retry_ms: 50,
        }
    }
}

impl CoordinatorConfig {
    pub fn default_location() -> PathBuf {
        config_directory().join(CONFIG_FILE_NAME)
    }

    /// Load the config file, `Ok(None)` if it doesn't exist
    pub fn load(path_override: Option<PathBuf>) -> anyhow::Result<Option<Self>> {
        let path = path_override.unwrap_or_else(Self::default_location);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No config file at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Unable to read {}", path.display()));
            }
        };
        let config: CoordinatorConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Unable to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        log::info!("Successfully loaded config file {}", path.display());
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data).with_context(|| format!("Unable to write {}", path.display()))?;
        log::info!("Successfully saved config file {}", path.display());
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_retry_ms)
    }
}
