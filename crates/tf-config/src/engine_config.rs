//! Typed engine configuration
//!
//! ```yaml
//! log_level: info
//! bus_capacity: 256
//! defaults:
//!   actionCd: 1000
//! rule_sets:
//!   - id: shopping
//!     subscriptions:
//!       - subscriptions/gkd.json5
//!     subscription_urls:
//!       - https://example.com/gkd.json5
//!     adhoc: !include_dir_merge_list adhoc
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use tf_rules::{AdhocRuleDef, ResolveReport, RuleDefaults, RuleResolver, SubscriptionDocument};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use crate::remote::{SubscriptionFetcher, DEFAULT_CACHE_MAX_AGE};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TAPFLOW_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level", alias = "logLevel")]
    pub log_level: String,

    /// Capacity of the trigger broadcast channel
    #[serde(default = "default_bus_capacity", alias = "busCapacity")]
    pub bus_capacity: usize,

    /// Timing defaults beneath every group and rule
    #[serde(default)]
    pub defaults: RuleDefaults,

    #[serde(default, alias = "ruleSets")]
    pub rule_sets: Vec<RuleSetConfig>,

    /// Where downloaded subscriptions are cached, relative to the config
    /// directory; `.cache/subscriptions` when unset
    #[serde(default, alias = "cacheDir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds a downloaded subscription is used before it is fetched again
    #[serde(default = "default_cache_max_age_secs", alias = "cacheMaxAgeSecs")]
    pub cache_max_age_secs: u64,

    /// Directory relative subscription paths resolve against
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// One rule-set (one workflow's rules)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Defaults for this rule-set, over the engine-wide ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<RuleDefaults>,

    /// Subscription files: YAML by extension, JSON or JSON5 otherwise
    #[serde(default)]
    pub subscriptions: Vec<PathBuf>,

    /// Subscriptions downloaded over HTTP
    #[serde(default, alias = "subscriptionUrls")]
    pub subscription_urls: Vec<String>,

    /// Subscription written inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionDocument>,

    #[serde(default)]
    pub adhoc: Vec<AdhocRuleDef>,
}

/// Rules of one rule-set, resolved and ready to activate
#[derive(Debug)]
pub struct LoadedRuleSet {
    pub id: String,
    pub report: ResolveReport,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bus_capacity() -> usize {
    256
}

fn default_cache_max_age_secs() -> u64 {
    DEFAULT_CACHE_MAX_AGE.as_secs()
}

fn default_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            bus_capacity: default_bus_capacity(),
            defaults: RuleDefaults::default(),
            rule_sets: Vec::new(),
            cache_dir: None,
            cache_max_age_secs: default_cache_max_age_secs(),
            config_dir: PathBuf::from("."),
        }
    }
}

impl RuleSetConfig {
    fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
            && self.subscription_urls.is_empty()
            && self.subscription.is_none()
            && self.adhoc.is_empty()
    }
}

impl EngineConfig {
    /// Load, process tags in and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        info!(path = %path.display(), "Loading configuration");

        let mut loader = YamlLoader::new(&config_dir);
        let value = loader.load_file(path.file_name().map_or(path, Path::new))?;
        let config = Self::from_yaml(value, config_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an already loaded YAML value
    pub fn from_yaml(value: Value, config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let value = match value {
            Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
            Value::Mapping(_) => value,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };
        let mut config: EngineConfig =
            serde_yaml::from_value(value).map_err(|e| ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: e.to_string(),
            })?;
        config.config_dir = config_dir.into();
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "bus_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let mut ids = HashSet::new();
        for rule_set in &self.rule_sets {
            if rule_set.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed {
                    message: "rule-set id must not be empty".to_string(),
                });
            }
            if !ids.insert(rule_set.id.as_str()) {
                return Err(ConfigError::ValidationFailed {
                    message: format!("duplicate rule-set id '{}'", rule_set.id),
                });
            }
            if rule_set.is_empty() {
                return Err(ConfigError::ValidationFailed {
                    message: format!("rule-set '{}' has no rules", rule_set.id),
                });
            }
            for url in &rule_set.subscription_urls {
                match reqwest::Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => {
                        return Err(ConfigError::InvalidValue {
                            key: format!("rule_sets.{}.subscription_urls", rule_set.id),
                            reason: format!("unsupported scheme '{}' in {}", parsed.scheme(), url),
                        })
                    }
                    Err(e) => {
                        return Err(ConfigError::InvalidValue {
                            key: format!("rule_sets.{}.subscription_urls", rule_set.id),
                            reason: format!("{}: {}", url, e),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    pub fn enabled_rule_sets(&self) -> impl Iterator<Item = &RuleSetConfig> {
        self.rule_sets.iter().filter(|rs| rs.enabled)
    }

    /// Directory downloaded subscriptions are cached in
    pub fn subscription_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => self.config_dir.join(dir),
            None => self.config_dir.join(".cache").join("subscriptions"),
        }
    }

    /// Read every enabled rule-set's subscriptions and resolve its rules
    ///
    /// Rules that fail to resolve are reported in each set's report rather
    /// than failing the load. Unreadable subscription files are errors, as
    /// are URLs that can neither be downloaded nor served from the cache.
    pub async fn load_rule_sets(&self) -> ConfigResult<Vec<LoadedRuleSet>> {
        let fetcher = if self
            .enabled_rule_sets()
            .any(|rs| !rs.subscription_urls.is_empty())
        {
            Some(SubscriptionFetcher::new(
                self.subscription_cache_dir(),
                Duration::from_secs(self.cache_max_age_secs),
            )?)
        } else {
            None
        };
        self.resolve_rule_sets(fetcher.as_ref()).await
    }

    /// Like [`load_rule_sets`](Self::load_rule_sets) with a given fetcher
    pub async fn load_rule_sets_with(
        &self,
        fetcher: &SubscriptionFetcher,
    ) -> ConfigResult<Vec<LoadedRuleSet>> {
        self.resolve_rule_sets(Some(fetcher)).await
    }

    async fn resolve_rule_sets(
        &self,
        fetcher: Option<&SubscriptionFetcher>,
    ) -> ConfigResult<Vec<LoadedRuleSet>> {
        let mut loaded = Vec::new();
        for rule_set in self.enabled_rule_sets() {
            let defaults = match &rule_set.defaults {
                Some(own) => own.clone().or(&self.defaults),
                None => self.defaults.clone(),
            };
            let mut resolver = RuleResolver::with_defaults(defaults);

            for path in &rule_set.subscriptions {
                let doc = self.load_subscription(path)?;
                resolver.subscription(&doc);
            }
            if let Some(fetcher) = fetcher {
                for url in &rule_set.subscription_urls {
                    let doc = fetcher.fetch(url).await?;
                    resolver.subscription(&doc);
                }
            }
            if let Some(doc) = &rule_set.subscription {
                resolver.subscription(doc);
            }
            for def in &rule_set.adhoc {
                resolver.adhoc(def);
            }

            let report = resolver.finish();
            if !report.errors.is_empty() {
                warn!(
                    rule_set = %rule_set.id,
                    errors = report.errors.len(),
                    "Some rules failed to resolve"
                );
            }
            debug!(rule_set = %rule_set.id, rules = report.rules.len(), "Rule-set resolved");
            loaded.push(LoadedRuleSet {
                id: rule_set.id.clone(),
                report,
            });
        }
        Ok(loaded)
    }

    fn load_subscription(&self, path: &Path) -> ConfigResult<SubscriptionDocument> {
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            let mut loader = YamlLoader::new(&self.config_dir);
            let value = loader.load_file(path)?;
            return serde_yaml::from_value(value).map_err(|source| ConfigError::SubscriptionYaml {
                path: self.config_dir.join(path),
                source,
            });
        }

        let full = self.config_dir.join(path);
        let text = std::fs::read_to_string(&full).map_err(|source| ConfigError::ReadFile {
            path: full.clone(),
            source,
        })?;
        SubscriptionDocument::parse(&text).map_err(|source| ConfigError::Subscription {
            path: full,
            source,
        })
    }
}
