//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML (or JSON, which goes through the same parser)
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// Environment variable not set and no default given
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// A JSON or JSON5 subscription does not hold a subscription document
    #[error("invalid subscription {path}: {source}")]
    Subscription {
        path: PathBuf,
        #[source]
        source: tf_rules::ResolveError,
    },

    /// A YAML subscription file does not hold a subscription document
    #[error("invalid subscription {path}: {source}")]
    SubscriptionYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A remote subscription could not be downloaded and nothing was cached
    #[error("failed to fetch subscription {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("configuration validation failed: {message}")]
    ValidationFailed { message: String },
}
