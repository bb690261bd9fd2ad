use crate::error::{GameSaveError, Result};
use crate::manager::ManagerOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILENAME: &str = "config.json";
const DEFAULT_SLOT_COUNT: u32 = 4;
const DEFAULT_QUOTA_BYTES: i64 = 16 * 1024 * 1024;
const DEFAULT_USER: &str = "player1";

/// Keys accepted by [`GameSaveConfig::set`].
pub const CONFIG_KEYS: [&str; 5] = [
    "slot_count",
    "sync_on_demand",
    "minimum_save_size",
    "quota_bytes",
    "user",
];

/// Configuration for gamesave, stored in `<root>/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSaveConfig {
    /// Number of board slots (1-based, at least one)
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,

    /// Open stores in sync-on-demand mode
    #[serde(default)]
    pub sync_on_demand: bool,

    /// Pad every save to at least this many bytes (0 disables padding)
    #[serde(default)]
    pub minimum_save_size: u32,

    /// Storage quota for the local store
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: i64,

    /// User whose saves are used when none is given on the command line
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_slot_count() -> u32 {
    DEFAULT_SLOT_COUNT
}

fn default_quota_bytes() -> i64 {
    DEFAULT_QUOTA_BYTES
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

impl Default for GameSaveConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            sync_on_demand: false,
            minimum_save_size: 0,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            user: default_user(),
        }
    }
}

impl GameSaveConfig {
    /// Load config from the given directory, or return defaults if not found
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILENAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: GameSaveConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to the given directory
    pub fn save<P: AsRef<Path>>(&self, config_dir: P) -> Result<()> {
        let config_dir = config_dir.as_ref();
        if !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_dir.join(CONFIG_FILENAME), content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "slot_count" => Ok(self.slot_count.to_string()),
            "sync_on_demand" => Ok(self.sync_on_demand.to_string()),
            "minimum_save_size" => Ok(self.minimum_save_size.to_string()),
            "quota_bytes" => Ok(self.quota_bytes.to_string()),
            "user" => Ok(self.user.clone()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Parse and set one key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "slot_count" => {
                let count: u32 = parse(key, value)?;
                if count == 0 {
                    return Err(GameSaveError::Config(
                        "slot_count must be at least 1".to_string(),
                    ));
                }
                self.slot_count = count;
            }
            "sync_on_demand" => self.sync_on_demand = parse(key, value)?,
            "minimum_save_size" => self.minimum_save_size = parse(key, value)?,
            "quota_bytes" => {
                let quota: i64 = parse(key, value)?;
                if quota < 0 {
                    return Err(GameSaveError::Config(
                        "quota_bytes cannot be negative".to_string(),
                    ));
                }
                self.quota_bytes = quota;
            }
            "user" => {
                if value.is_empty() {
                    return Err(GameSaveError::Config("user cannot be empty".to_string()));
                }
                self.user = value.to_string();
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            slot_count: self.slot_count,
            minimum_padded_size: self.minimum_save_size,
            ..ManagerOptions::default()
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GameSaveError::Config(format!("invalid value for {key}: {value:?}")))
}

fn unknown_key(key: &str) -> GameSaveError {
    GameSaveError::Config(format!(
        "unknown key {key:?} (expected one of: {})",
        CONFIG_KEYS.join(", ")
    ))
}
