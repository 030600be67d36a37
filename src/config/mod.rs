//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod server;
mod storage;

pub use server::{AuthConfig, IngestConfig, ServerConfig};
pub use storage::{resolve_endpoint, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PATHTAKER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PATHTAKER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PATHTAKER_LOG";
/// Legacy environment variable naming the search cluster host.
pub const ELASTICSEARCH_HOSTNAME_ENV_VAR: &str = "ELASTICSEARCH_HOSTNAME";

use serde::Deserialize;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Credentials required on protected routes.
    pub auth: AuthConfig,
    /// Search backend.
    pub storage: StorageConfig,
    /// Bulk write tuning.
    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. `ELASTICSEARCH_HOSTNAME`, for the storage endpoint only
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;

        if let Ok(hostname) = std::env::var(ELASTICSEARCH_HOSTNAME_ENV_VAR) {
            if !hostname.trim().is_empty() {
                config.storage.endpoint = hostname;
            }
        }
        config.storage.endpoint = resolve_endpoint(&config.storage.endpoint);

        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.username.is_empty() || self.auth.password.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.username and auth.password must be set".to_string(),
            ));
        }
        if self.ingest.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "ingest.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.storage.index.is_empty() {
            return Err(ConfigError::Invalid("storage.index must be set".to_string()));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            auth: AuthConfig {
                username: "user".to_string(),
                password: "secret".to_string(),
            },
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}
