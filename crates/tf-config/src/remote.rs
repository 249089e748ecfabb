//! Remote subscriptions
//!
//! Subscriptions named by URL are downloaded over HTTP and kept in an on-disk
//! cache, one file per URL. A cached copy younger than the maximum age is used
//! without touching the network. When a download fails, an older cached copy
//! is used instead, so a flaky network does not take rule-sets down.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reqwest::Client;
use tracing::{debug, info, warn};

use tf_rules::SubscriptionDocument;

use crate::error::{ConfigError, ConfigResult};

/// How long a downloaded subscription is used before it is fetched again
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads subscriptions and caches them on disk
#[derive(Debug, Clone)]
pub struct SubscriptionFetcher {
    client: Client,
    cache_dir: PathBuf,
    max_age: Duration,
}

struct CachedCopy {
    path: PathBuf,
    text: String,
    age: Duration,
}

impl SubscriptionFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, max_age: Duration) -> ConfigResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "http_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, cache_dir, max_age))
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(client: Client, cache_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
            max_age,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// File a URL's subscription is cached in
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", urlencoding::encode(url)))
    }

    /// Get the subscription at `url`, from the cache when it is fresh enough
    pub async fn fetch(&self, url: &str) -> ConfigResult<SubscriptionDocument> {
        let cached = self.read_cache(url).await;

        if let Some(copy) = &cached {
            if copy.age < self.max_age {
                match SubscriptionDocument::parse(&copy.text) {
                    Ok(doc) => {
                        debug!(url, age_secs = copy.age.as_secs(), "Using cached subscription");
                        return Ok(doc);
                    }
                    Err(e) => {
                        warn!(url, path = %copy.path.display(), error = %e, "Ignoring unreadable cache entry");
                    }
                }
            }
        }

        let reason = match self.download(url).await {
            Ok((text, doc)) => {
                self.store(url, &text).await;
                return Ok(doc);
            }
            Err(reason) => reason,
        };

        if let Some(copy) = cached {
            if let Ok(doc) = SubscriptionDocument::parse(&copy.text) {
                warn!(
                    url,
                    age_secs = copy.age.as_secs(),
                    reason = %reason,
                    "Download failed, using stale cached subscription"
                );
                return Ok(doc);
            }
        }
        Err(ConfigError::Fetch {
            url: url.to_string(),
            reason,
        })
    }

    async fn download(&self, url: &str) -> Result<(String, SubscriptionDocument), String> {
        info!(url, "Downloading subscription");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let text = response.text().await.map_err(|e| e.to_string())?;
        let doc = SubscriptionDocument::parse(&text).map_err(|e| e.to_string())?;
        Ok((text, doc))
    }

    async fn read_cache(&self, url: &str) -> Option<CachedCopy> {
        let path = self.cache_path(url);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(CachedCopy { path, text, age }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cached subscription");
                None
            }
        }
    }

    async fn store(&self, url: &str, text: &str) {
        let path = self.cache_path(url);
        let result = match tokio::fs::create_dir_all(&self.cache_dir).await {
            Ok(()) => tokio::fs::write(&path, text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to cache subscription");
        }
    }
}
