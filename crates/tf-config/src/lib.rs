//! Configuration loading for tapflow
//!
//! Configuration is YAML (JSON files are accepted wherever YAML is) with a
//! few custom tags:
//!
//! - `!include path` - Include another file
//! - `!include_dir_merge_list dir` - Merge lists from all files in a directory
//! - `!env_var NAME [default]` - Environment variable substitution
//!
//! Subscription files may also be JSON5, and rule-sets may name subscriptions
//! by URL; those are downloaded and cached on disk (see [`SubscriptionFetcher`]).
//!
//! # Example
//!
//! ```ignore
//! use tf_config::EngineConfig;
//!
//! let config = EngineConfig::load("/etc/tapflow/tapflow.yaml")?;
//! for rule_set in config.load_rule_sets().await? {
//!     println!("{}: {} rules", rule_set.id, rule_set.report.rules.len());
//! }
//! ```

mod engine_config;
mod error;
mod loader;
mod remote;

pub use engine_config::{EngineConfig, LoadedRuleSet, RuleSetConfig, CONFIG_ENV_VAR};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use remote::{SubscriptionFetcher, DEFAULT_CACHE_MAX_AGE};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
