//! Configuration management for evalcache

pub mod schema;

pub use schema::{Config, StoreConfig};

use crate::error::{EvalError, EvalResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the store root
pub const STORE_ENV: &str = "EVALCACHE_STORE";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("evalcache")
            .join("config.toml")
    }

    /// Store root used when neither the environment nor the config names one
    pub fn default_store_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("evalcache")
    }

    /// Effective store root: `EVALCACHE_STORE`, then config, then default
    pub fn store_root(config: &Config) -> PathBuf {
        if let Some(root) = std::env::var_os(STORE_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(root);
        }
        config
            .store
            .root
            .clone()
            .unwrap_or_else(Self::default_store_root)
    }

    /// Load configuration, falling back to defaults if not present
    pub fn load(&self) -> EvalResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, path: &Path) -> EvalResult<Config> {
        let content = fs::read_to_string(path).map_err(|e| {
            EvalError::storage(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| EvalError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> EvalResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EvalError::storage(format!("creating {}", parent.display()), e)
            })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).map_err(|e| {
            EvalError::storage(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Layout;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nonexistent.toml"));

        let config = manager.load().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nested").join("config.toml"));

        let mut config = Config::default();
        config.engine.function_dump = true;
        config.store.layout = Layout::Flat;
        config.store.root = Some(temp.path().join("store"));

        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn invalid_toml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[engine]\nalgo = \"md5\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().unwrap_err();
        assert!(matches!(err, EvalError::ConfigInvalid { path: p, .. } if p == path));
    }

    #[test]
    #[serial]
    fn store_root_precedence() {
        let mut config = Config::default();
        std::env::remove_var(STORE_ENV);
        assert_eq!(
            ConfigManager::store_root(&config),
            ConfigManager::default_store_root()
        );

        config.store.root = Some(PathBuf::from("/from/config"));
        assert_eq!(
            ConfigManager::store_root(&config),
            PathBuf::from("/from/config")
        );

        std::env::set_var(STORE_ENV, "/from/env");
        assert_eq!(ConfigManager::store_root(&config), PathBuf::from("/from/env"));
        std::env::remove_var(STORE_ENV);
    }
}
