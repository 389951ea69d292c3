//! Configuration management for mongos3
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{ConfigError, Result};
use crate::export::coordinator::{DEFAULT_BATCH_SIZE, DEFAULT_RETRY_BACKOFF_MS};
use crate::export::part::DEFAULT_CHUNK_SIZE_BYTES;
use crate::export::pool::DEFAULT_MAX_CONCURRENCY;
use crate::export::{ExportOptions, JsonMode};
use crate::storage::S3Config;
use crate::storage::s3::{MAX_PART_SIZE, MIN_PART_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: S3Config,

    /// Export pipeline tuning
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database to export from
    #[serde(default)]
    pub database: Option<String>,

    /// Collection to export
    #[serde(default)]
    pub collection: Option<String>,

    /// Records fetched per cursor batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Keep the server-side cursor alive for long exports
    #[serde(default = "default_no_cursor_timeout")]
    pub no_cursor_timeout: bool,
}

/// Export pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Part size cap in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,

    /// Maximum concurrent part uploads
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Extra attempts per failed part
    #[serde(default)]
    pub part_retries: u32,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Skip records that cannot be serialized
    #[serde(default)]
    pub skip_malformed: bool,

    /// Extended JSON flavour (canonical, relaxed)
    #[serde(default)]
    pub json_mode: JsonMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_no_cursor_timeout() -> bool {
    true
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: None,
            collection: None,
            batch_size: default_batch_size(),
            no_cursor_timeout: default_no_cursor_timeout(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            part_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            skip_malformed: false,
            json_mode: JsonMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileNotFound(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from a file, falling back to defaults if it does not exist
    ///
    /// # Arguments
    /// * `path` - Explicit path, or None for the default location
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };

        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Override fields from `MONGOS3_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Override fields from environment-style variables provided by `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MONGOS3_URI") {
            self.source.uri = uri;
        }
        if let Some(region) = lookup("MONGOS3_REGION") {
            self.storage.region = Some(region);
        }
        if let Some(endpoint) = lookup("MONGOS3_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(value) = lookup("MONGOS3_CHUNK_SIZE") {
            self.export.chunk_size_bytes = parse_env("MONGOS3_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = lookup("MONGOS3_CONCURRENCY") {
            self.export.max_concurrency = parse_env("MONGOS3_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("MONGOS3_BATCH_SIZE") {
            self.source.batch_size = parse_env("MONGOS3_BATCH_SIZE", &value)?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongos3")
            .join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(ConfigError::MissingField("source.uri".to_string()).into());
        }
        if self.source.batch_size == 0 {
            return Err(invalid("source.batch_size", 0).into());
        }
        if self.export.max_concurrency == 0 {
            return Err(invalid("export.max_concurrency", 0).into());
        }

        let chunk = self.export.chunk_size_bytes as u64;
        if chunk == 0 || chunk > MAX_PART_SIZE {
            return Err(invalid("export.chunk_size_bytes", chunk).into());
        }
        if chunk < MIN_PART_SIZE {
            warn!(
                "chunk_size_bytes {} is below the 5 MiB S3 minimum; uploads with more than one part will be rejected by S3",
                chunk
            );
        }
        Ok(())
    }

    /// Pipeline options derived from this configuration
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            chunk_size_bytes: self.export.chunk_size_bytes,
            max_concurrency: self.export.max_concurrency,
            batch_size: self.source.batch_size,
            part_retries: self.export.part_retries,
            retry_backoff_ms: self.export.retry_backoff_ms,
            skip_malformed: self.export.skip_malformed,
            json_mode: self.export.json_mode,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value).into())
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source.uri, "mongodb://localhost:27017");
        assert_eq!(config.source.batch_size, 1000);
        assert!(config.source.no_cursor_timeout);
        assert_eq!(config.export.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.export.max_concurrency, 5);
        assert_eq!(config.export.json_mode, JsonMode::Canonical);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [source]
            database = "shop"

            [export]
            max_concurrency = 8
            json_mode = "relaxed"

            [storage]
            endpoint = "http://localhost:9000"
            force_path_style = true
            "#,
        )
        .unwrap();

        assert_eq!(config.source.database.as_deref(), Some("shop"));
        assert_eq!(config.source.batch_size, 1000);
        assert_eq!(config.export.max_concurrency, 8);
        assert_eq!(config.export.json_mode, JsonMode::Relaxed);
        assert_eq!(config.export.chunk_size_bytes, 1024 * 1024);
        assert!(config.storage.force_path_style);
    }

    #[test]
    fn test_invalid_toml_is_format_error() {
        let err = Config::from_toml("[export\nmax_concurrency = ").unwrap_err();
        assert!(matches!(err, ExportError::Config(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("mongos3-does-not-exist/config.toml");
        let config = Config::load_from_file(Some(&path)).unwrap();
        assert_eq!(config.export.max_concurrency, 5);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MONGOS3_URI", "mongodb://db:27017"),
            ("MONGOS3_CHUNK_SIZE", "8388608"),
            ("MONGOS3_CONCURRENCY", "3"),
            ("MONGOS3_REGION", "eu-west-1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_with(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source.uri, "mongodb://db:27017");
        assert_eq!(config.export.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.export.max_concurrency, 3);
        assert_eq!(config.storage.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.source.batch_size, 1000);
    }

    #[test]
    fn test_env_rejects_non_numeric() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|name| (name == "MONGOS3_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.export.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.export.chunk_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.batch_size = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[export]"));
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.export.retry_backoff_ms, 200);
    }

    #[test]
    fn test_export_options_follow_config() {
        let mut config = Config::default();
        config.source.batch_size = 50;
        config.export.part_retries = 2;
        let options = config.export_options();
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.part_retries, 2);
    }
}
