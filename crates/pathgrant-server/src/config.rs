//! Configuration management for the permission engine.
//!
//! Sources, lowest precedence first:
//! 1. Default values
//! 2. Configuration file (YAML)
//! 3. Environment variables prefixed with `PATHGRANT_`
//!
//! Nested keys use `__` as separator, e.g. `PATHGRANT_STORAGE__BACKEND=postgres`
//! overrides `storage.backend`.
//!
//! # Example
//!
//! ```ignore
//! use pathgrant_server::config::EngineConfig;
//!
//! let config = EngineConfig::load("pathgrant.yaml")?;
//! let config = EngineConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use pathgrant_domain::{BatchConfig, IndexCacheConfig, DEFAULT_MAX_BATCH_SIZE};
use pathgrant_storage::PostgresConfig;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "PATHGRANT";

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub limits: LimitsSettings,

    #[serde(default)]
    pub index_cache: IndexCacheSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

impl StorageSettings {
    /// PostgreSQL settings derived from this section.
    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            database_url: self.database_url.clone().unwrap_or_default(),
            max_connections: self.pool_size,
            connect_timeout_secs: self.connection_timeout_secs,
            query_timeout_secs: self.query_timeout_secs,
            ..PostgresConfig::default()
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LimitsSettings {
    /// Maximum number of items in one batch request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

impl LimitsSettings {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default().with_max_batch_size(self.max_batch_size)
    }
}

/// Read-allowed storage cache settings.
///
/// Disabled by default. Every write invalidates affected entries before it
/// returns, so enabling it never serves a revoked storage.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IndexCacheSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for IndexCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    30
}

impl IndexCacheSettings {
    pub fn cache_config(&self) -> IndexCacheConfig {
        IndexCacheConfig::default()
            .with_enabled(self.enabled)
            .with_max_capacity(self.max_capacity)
            .with_ttl(Duration::from_secs(self.ttl_secs))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl EngineConfig {
    /// Loads a YAML file with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Loads defaults with environment variable overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(env_source())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory", "postgres"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "postgres"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.database_url is required when backend is 'postgres'".to_string(),
            });
        }

        if self.storage.pool_size == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "storage.pool_size must be greater than 0".to_string(),
            });
        }

        if self.limits.max_batch_size == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "limits.max_batch_size must be greater than 0".to_string(),
            });
        }

        if self.index_cache.enabled && self.index_cache.max_capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "index_cache.max_capacity must be greater than 0 when enabled"
                    .to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
