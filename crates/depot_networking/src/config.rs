use std::{fmt::Debug, time::Duration};

use reqwest_middleware::ClientWithMiddleware;

use crate::retry_policies::LinearBackoff;

/// Number of retries performed when none is configured.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between attempts when none is configured.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on the delay between two attempts when none is configured.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Per-attempt timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// Settings for a download.
///
/// Fields left at their zero value (`Duration::ZERO`, `None`, empty string)
/// fall back to the `DEFAULT_*` constants of this crate, so
/// `FetchConfig::default()` is a usable configuration.
///
/// `retry_attempts` counts *retries*: `Some(0)` performs exactly one request,
/// `None` uses [`DEFAULT_RETRY_ATTEMPTS`].
#[derive(Clone, Default)]
pub struct FetchConfig {
    /// The client used to issue requests.
    pub client: ClientWithMiddleware,

    /// Timeout of a single attempt, including reading the body.
    pub timeout: Duration,

    /// Number of retries after the first attempt.
    pub retry_attempts: Option<u32>,

    /// Base delay, multiplied by the attempt number.
    pub retry_delay: Duration,

    /// Upper bound of the delay between two attempts.
    pub max_retry_delay: Duration,

    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Debug for FetchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchConfig")
            .field("timeout", &self.timeout())
            .field("retry_attempts", &self.retry_attempts())
            .field("retry_delay", &self.retry_delay())
            .field("max_retry_delay", &self.max_retry_delay())
            .field("user_agent", &self.user_agent())
            .finish_non_exhaustive()
    }
}

impl FetchConfig {
    /// Use the given client for requests.
    pub fn with_client(mut self, client: impl Into<ClientWithMiddleware>) -> Self {
        self.client = client.into();
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of retries.
    pub fn with_retry_attempts(mut self, retries: u32) -> Self {
        self.retry_attempts = Some(retries);
        self
    }

    /// Sets the base and maximum delay between attempts.
    pub fn with_retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry_delay = base;
        self.max_retry_delay = max;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// The effective per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        non_zero_or(self.timeout, DEFAULT_TIMEOUT)
    }

    /// The effective number of retries.
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    /// The effective base delay.
    pub fn retry_delay(&self) -> Duration {
        non_zero_or(self.retry_delay, DEFAULT_RETRY_DELAY)
    }

    /// The effective delay ceiling.
    pub fn max_retry_delay(&self) -> Duration {
        non_zero_or(self.max_retry_delay, DEFAULT_MAX_RETRY_DELAY)
    }

    /// The effective user agent.
    pub fn user_agent(&self) -> &str {
        if self.user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            &self.user_agent
        }
    }

    /// The retry policy described by this configuration.
    pub fn retry_policy(&self) -> LinearBackoff {
        LinearBackoff::new(
            self.retry_delay(),
            self.max_retry_delay(),
            self.retry_attempts(),
        )
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}
