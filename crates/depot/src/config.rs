use std::{path::PathBuf, time::Duration};

use depot_networking::FetchConfig;
use depot_storage::{IdentityStrategy, StorageConfig};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

/// Settings of an [`EcosystemAdapter`](crate::EcosystemAdapter).
///
/// Can be deserialized from a configuration file; missing fields take their
/// default. Durations are written in milliseconds.
///
/// ```toml
/// cache-enabled = true
/// strategy = "content-hash"
/// timeout = 10000
/// mirrors = ["https://mirror.example.com/npm"]
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AdapterConfig {
    /// Serve artifacts that are already stored without downloading them.
    pub cache_enabled: bool,

    /// Write fetched artifacts to the configured byte store. When disabled,
    /// each fetch is staged privately and discarded with its reader.
    pub persist_artifacts: bool,

    /// Record metadata for every stored artifact.
    pub metadata_enabled: bool,

    /// Timeout of a single download attempt.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,

    /// Retries after the first download attempt. `None` uses the default of
    /// the networking layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    /// Base delay between download attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,

    /// Upper bound of the delay between download attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_retry_delay: Duration,

    /// Namespace prepended to every storage key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,

    /// Directory for staging artifacts that are not persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// How artifact identifiers are derived.
    pub strategy: IdentityStrategy,

    /// Always compute the content hash of stored artifacts.
    pub content_hash_in_id: bool,

    /// The registry to download from. Defaults to the ecosystem's public
    /// registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<Url>,

    /// Registries tried in order after the primary one fails.
    pub mirrors: Vec<Url>,

    /// The user agent sent with requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            persist_artifacts: true,
            metadata_enabled: true,
            timeout: depot_networking::DEFAULT_TIMEOUT,
            retry_attempts: None,
            retry_delay: depot_networking::DEFAULT_RETRY_DELAY,
            max_retry_delay: depot_networking::DEFAULT_MAX_RETRY_DELAY,
            key_prefix: None,
            temp_dir: None,
            strategy: IdentityStrategy::default(),
            content_hash_in_id: false,
            registry: None,
            mirrors: Vec::new(),
            user_agent: None,
        }
    }
}

/// An invalid [`AdapterConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field has a value that cannot be used.
    #[error("invalid value for '{0}': {1}")]
    InvalidValue(String, String),
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(field.to_owned(), reason.into())
}

impl AdapterConfig {
    /// Checks that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "the timeout must be greater than zero"));
        }
        if self.retry_delay.is_zero() {
            return Err(invalid(
                "retry-delay",
                "the retry delay must be greater than zero",
            ));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(invalid(
                "max-retry-delay",
                format!(
                    "{:?} is shorter than the retry delay of {:?}",
                    self.max_retry_delay, self.retry_delay
                ),
            ));
        }
        if let Some(prefix) = &self.key_prefix {
            let relative = prefix.trim_end_matches('/');
            if prefix.starts_with('/')
                || (!relative.is_empty() && depot_storage::validate_key(relative).is_err())
            {
                return Err(invalid(
                    "key-prefix",
                    format!("'{prefix}' is not a valid relative storage key"),
                ));
            }
        }
        if let Some(temp_dir) = &self.temp_dir {
            if !temp_dir.is_dir() {
                return Err(invalid(
                    "temp-dir",
                    format!("{} is not a directory", temp_dir.display()),
                ));
            }
        }
        for (field, url) in self
            .registry
            .iter()
            .map(|url| ("registry", url))
            .chain(self.mirrors.iter().map(|url| ("mirrors", url)))
        {
            if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(field, format!("{url} is not an http(s) base url")));
            }
        }
        Ok(())
    }

    /// The storage settings described by this configuration.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            strategy: self.strategy,
            compute_hash: self.content_hash_in_id || self.metadata_enabled,
            cache_enabled: self.cache_enabled,
            key_prefix: self
                .key_prefix
                .as_deref()
                .map(|prefix| prefix.trim_matches('/'))
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_owned),
        }
    }

    /// The download settings described by this configuration, without a
    /// client.
    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::default()
            .with_timeout(self.timeout)
            .with_retry_delay(self.retry_delay, self.max_retry_delay);
        if let Some(retries) = self.retry_attempts {
            config = config.with_retry_attempts(retries);
        }
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        config
    }
}
