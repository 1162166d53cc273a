//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating SnapVault
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `SNAPVAULT_STORAGE_DIR`: Override storage directory path
//! - `SNAPVAULT_KEY_PATH`: Override cipher key file path
//! - `SNAPVAULT_CONFIG`: Override config file path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_STORAGE_DIR: &str = "SNAPVAULT_STORAGE_DIR";
pub const ENV_KEY_PATH: &str = "SNAPVAULT_KEY_PATH";
pub const ENV_CONFIG_PATH: &str = "SNAPVAULT_CONFIG";

fn default_save_file() -> String {
    "snapshot.sav".to_string()
}

fn default_integrity() -> bool {
    true
}

fn default_autosave_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage_dir: String,
    /// Save file name inside `storage_dir`.
    #[serde(default = "default_save_file")]
    pub save_file: String,
    /// Key file for the XChaCha cipher; absent means saves are stored in
    /// the clear.
    #[serde(default)]
    pub key_path: Option<String>,
    /// Whether a corruption-detection digest is written and verified.
    #[serde(default = "default_integrity")]
    pub integrity: bool,
    /// Autosave period in seconds; 0 disables the autosave loop.
    #[serde(default = "default_autosave_secs")]
    pub autosave_interval_secs: u64,
    /// Allow-list of provider type names. Non-empty overrides the deny list.
    #[serde(default)]
    pub include_providers: Vec<String>,
    /// Deny-list of provider type names.
    #[serde(default)]
    pub exclude_providers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: "./saves".to_string(),
            save_file: default_save_file(),
            key_path: None,
            integrity: true,
            autosave_interval_secs: default_autosave_secs(),
            include_providers: Vec::new(),
            exclude_providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config = serde_json::from_str(&s)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        // Check for config path from environment
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s)?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    fn apply_env_overrides(&mut self) {
        if let Ok(storage_dir) = env::var(ENV_STORAGE_DIR) {
            debug!(storage_dir = %storage_dir, "overriding storage_dir from environment");
            self.storage_dir = storage_dir;
        }

        if let Ok(key_path) = env::var(ENV_KEY_PATH) {
            debug!(key_path = %key_path, "overriding key_path from environment");
            self.key_path = Some(key_path);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.trim().is_empty() {
            anyhow::bail!("storage_dir cannot be empty");
        }

        if self.save_file.trim().is_empty() {
            anyhow::bail!("save_file cannot be empty");
        }

        // The save file must live directly inside the storage directory
        if self.save_file.contains('/') || self.save_file.contains('\\') {
            anyhow::bail!("save_file must be a bare file name, not a path");
        }

        // Warn if the key path looks like it might be in a public directory
        if let Some(key_path) = &self.key_path {
            if key_path.trim().is_empty() {
                anyhow::bail!("key_path cannot be empty when set");
            }
            let path = Path::new(key_path);
            if let Some(parent) = path.parent() {
                let parent_str = parent.to_string_lossy().to_lowercase();
                if parent_str.contains("public")
                    || parent_str.contains("www")
                    || parent_str.contains("htdocs")
                {
                    warn!(
                        path = %key_path,
                        "key file path appears to be in a public directory - this is a security risk"
                    );
                }
            }
        }

        if self.storage_dir.contains("..") {
            warn!("storage_dir contains '..' - consider using absolute paths");
        }

        Ok(())
    }

    /// Create a new config with explicit values
    pub fn new(storage_dir: impl Into<String>, save_file: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            save_file: save_file.into(),
            ..Self::default()
        }
    }

    /// Full path of the main save file.
    pub fn save_path(&self) -> PathBuf {
        Path::new(&self.storage_dir).join(&self.save_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("default config validates");
    }

    #[test]
    fn rejects_pathlike_save_file() {
        let mut cfg = Config::default();
        cfg.save_file = "nested/snapshot.sav".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_storage_dir() {
        let mut cfg = Config::default();
        cfg.storage_dir = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_path_joins_dir_and_file() {
        let cfg = Config::new("/tmp/saves", "game.sav");
        assert_eq!(cfg.save_path(), PathBuf::from("/tmp/saves/game.sav"));
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let cfg: Config =
            serde_json::from_str("{\"storage_dir\":\"./saves\"}").expect("parse minimal config");
        assert_eq!(cfg.save_file, "snapshot.sav");
        assert!(cfg.integrity);
        assert_eq!(cfg.autosave_interval_secs, 60);
        assert!(cfg.key_path.is_none());
    }
}
