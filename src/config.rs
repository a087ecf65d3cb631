//! Process-local configuration (spec §6, §13).
//!
//! Persisted to `~/.boardroom-journal/config.json`. Missing fields fall
//! back to defaults so older config files keep loading across releases.
//! `UserPreferences` (spec §3) is the synced superset of this file; this
//! struct is only the bootstrap read at process start.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractionDefault {
    Off,
    On,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractionDefaults {
    #[serde(default = "default_off")]
    pub quick: AbstractionDefault,
    #[serde(default = "default_off")]
    pub setup: AbstractionDefault,
    #[serde(default = "default_off")]
    pub quarterly: AbstractionDefault,
}

fn default_off() -> AbstractionDefault {
    AbstractionDefault::Off
}

impl Default for AbstractionDefaults {
    fn default() -> Self {
        AbstractionDefaults {
            quick: AbstractionDefault::Off,
            setup: AbstractionDefault::Off,
            quarterly: AbstractionDefault::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub abstraction_default: AbstractionDefaults,
    #[serde(default)]
    pub remember_abstraction_choice: bool,
    #[serde(default)]
    pub analytics_opt_in: bool,
    #[serde(default)]
    pub audio_retain_on_failure: bool,
    #[serde(default = "default_brief_weekday")]
    pub brief_schedule_weekday: u32,
    #[serde(default = "default_brief_hour")]
    pub brief_schedule_hour: u32,
    #[serde(default = "default_sync_poll_secs")]
    pub sync_poll_interval_secs: u64,
}

fn default_brief_weekday() -> u32 {
    0 // chrono Weekday::Sun as u32 via NaiveDate conventions; 0 == Sunday here
}

fn default_brief_hour() -> u32 {
    20
}

fn default_sync_poll_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Config {
            abstraction_default: AbstractionDefaults::default(),
            remember_abstraction_choice: false,
            analytics_opt_in: false,
            audio_retain_on_failure: false,
            brief_schedule_weekday: default_brief_weekday(),
            brief_schedule_hour: default_brief_hour(),
            sync_poll_interval_secs: default_sync_poll_secs(),
        }
    }
}

/// `~/.boardroom-journal`
pub fn state_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".boardroom-journal"))
}

pub fn config_path() -> Result<PathBuf, String> {
    Ok(state_dir()?.join("config.json"))
}

/// Load configuration, falling back to defaults if the file is absent
/// or partially unreadable (forward-compat deserialization via `serde(default)`).
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {e}"))
}

pub fn save_config(config: &Config) -> Result<(), String> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {e}"))?;
        }
    }
    let content =
        serde_json::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {e}"))?;
    fs::write(&path, content).map_err(|e| format!("Failed to write config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_abstraction_by_default() {
        let config = Config::default();
        assert_eq!(config.abstraction_default.quick, AbstractionDefault::Off);
        assert!(!config.remember_abstraction_choice);
    }
}
