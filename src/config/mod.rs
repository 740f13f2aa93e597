// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

use crate::queue::QueueNames;

/// Configuration for the on-disk model tree
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Root directory holding `<name>/<version>/` trees
    pub directory: PathBuf,
}

/// Connection to the tensor/model store
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store host name
    pub host: String,
    /// Store port
    pub port: u16,
    /// Device models are registered on (e.g. CPU, GPU)
    pub device: String,
    /// Seconds a worker waits on an empty queue before polling again
    pub pop_timeout_secs: u64,
}

/// Configuration for one HTTP service
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Where model archives are downloaded from
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// URL with an `{id}` placeholder for the file identifier
    pub url_template: String,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log directory; logs go to stdout when absent
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Model tree settings
    pub models: ModelConfig,
    /// Store connection settings
    pub store: StoreConfig,
    /// Command queue names
    #[serde(default)]
    pub queues: QueueNames,
    /// File manager HTTP service
    pub file_manager: ServerConfig,
    /// Inference HTTP service
    pub inference: ServerConfig,
    /// Archive download settings
    pub archive: ArchiveConfig,
    /// Logging-related settings
    pub logging: LoggingConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Loads settings from `./config`.
    ///
    /// Sources in order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with MODELHUB__ (e.g. `MODELHUB__STORE__HOST`)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");
        Self::load(&config_dir)
    }

    /// Loads settings from the given config directory.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        // Check if config directory exists
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        // Check if default.toml exists
        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }

        let local_config = config_dir.join("local.toml");

        let settings = Config::builder()
            .add_source(File::from(default_config))
            .add_source(File::from(local_config).required(false))
            .add_source(Environment::with_prefix("MODELHUB").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;

        // Validate settings after loading
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        // Create models directory if it doesn't exist
        if !self.models.directory.exists() {
            std::fs::create_dir_all(&self.models.directory).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to create models directory at {}: {}",
                    self.models.directory.display(), e
                ))
            })?;
        }

        for (service, server) in [("file_manager", &self.file_manager), ("inference", &self.inference)] {
            if server.port == 0 {
                return Err(ConfigError::Message(
                    format!("{} port must be between 1 and 65535, got: 0", service)
                ));
            }
        }

        if self.store.port == 0 {
            return Err(ConfigError::Message("store port must be between 1 and 65535".to_string()));
        }

        if self.store.pop_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "pop_timeout_secs must be greater than 0".to_string()
            ));
        }

        if !self.archive.url_template.contains("{id}") {
            return Err(ConfigError::Message(format!(
                "archive url_template must contain an {{id}} placeholder, got: {}",
                self.archive.url_template
            )));
        }

        let queues = [&self.queues.add_model, &self.queues.delete_model, &self.queues.delete_tensor];
        if queues.iter().any(|q| q.is_empty())
            || queues.iter().collect::<HashSet<_>>().len() != queues.len()
        {
            return Err(ConfigError::Message(
                "queue names must be non-empty and distinct".to_string()
            ));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }?;

        // Create log directory if configured and doesn't exist
        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(), e
                    ))
                })?;
            }
        }

        Ok(())
    }
}
