use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::MullConfig;
use mull_core::MullError;

/// Loads and reloads the Mull configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<MullConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MULL_CONFIG env > ~/.mull/mull.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MULL_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mull")
            .join("mull.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> mull_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            MullConfig::default()
        };

        let config = Self::apply_env_overrides(config, |k| std::env::var(k).ok());

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(MullError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse a config from TOML text.
    pub fn parse(raw: &str) -> mull_core::Result<MullConfig> {
        toml::from_str::<MullConfig>(raw).map_err(|e| MullError::Config(e.to_string()))
    }

    fn read(path: &Path) -> mull_core::Result<MullConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<MullConfig>(&raw).map_err(|e| {
            MullError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> MullConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<MullConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (MULL_PLANNER, MULL_MAX_ITERATIONS, etc.).
    /// `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(mut config: MullConfig, lookup: F) -> MullConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MULL_PLANNER") {
            config.planner.default = v;
        }
        if let Some(n) = lookup("MULL_MAX_ITERATIONS").and_then(|v| v.parse::<usize>().ok()) {
            config.executor.max_iterations = n;
        }
        if let Some(n) = lookup("MULL_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.executor.timeout_secs = n;
        }
        if let Some(v) = lookup("MULL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("MULL_LOG_FORMAT") {
            config.logging.format = v;
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> mull_core::Result<()> {
        if !self.config_path.exists() {
            return Err(MullError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::read(&self.config_path)?;
        let new_config = Self::apply_env_overrides(new_config, |k| std::env::var(k).ok());
        new_config.validate().map_err(MullError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
