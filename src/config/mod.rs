//! Configuration management for xplat

pub mod schema;

pub use schema::Config;

use crate::error::{XplatError, XplatResult};
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

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
            .join("xplat")
            .join("config.toml")
    }

    /// Get the default state directory path
    pub fn default_state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xplat")
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> XplatResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> XplatResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| XplatError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| XplatError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        validate(&config).map_err(|reason| XplatError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> XplatResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            XplatError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> XplatResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| XplatError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
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

impl Config {
    /// Effective state directory
    pub fn state_dir(&self) -> PathBuf {
        self.engine
            .state_dir
            .clone()
            .unwrap_or_else(ConfigManager::default_state_dir)
    }

    /// Effective local registry root
    pub fn registry_dir(&self) -> PathBuf {
        self.registry
            .local_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("registry"))
    }

    /// Platform the executor treats as native
    pub fn default_platform(&self) -> XplatResult<Platform> {
        match self.engine.default_platform {
            Some(ref text) => Platform::parse(text),
            None => Ok(Platform::native()),
        }
    }
}

/// Semantic checks serde cannot express
fn validate(config: &Config) -> Result<(), String> {
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(format!(
            "general.log_format must be \"text\" or \"json\", got \"{}\"",
            config.general.log_format
        ));
    }
    if !matches!(config.registry.kind.as_str(), "local" | "http") {
        return Err(format!(
            "registry.kind must be \"local\" or \"http\", got \"{}\"",
            config.registry.kind
        ));
    }
    if config.backend.kind != "podman" {
        return Err(format!(
            "backend.kind must be \"podman\", got \"{}\"",
            config.backend.kind
        ));
    }
    if let Some(ref platform) = config.engine.default_platform {
        Platform::parse(platform).map_err(|e| e.to_string())?;
    }
    Ok(())
}
