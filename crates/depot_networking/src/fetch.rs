//! Downloading with retries and mirror fallback.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    redaction::{redact_error, redact_url},
    retry_policies::{RetryDecision, RetryPolicy},
    FetchConfig, FetchError,
};

/// The result of a successful download.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The response body.
    pub bytes: Bytes,

    /// The URL that served the body.
    pub url: Url,

    /// Position of [`Self::url`] in the list of candidates. Always `0` for
    /// [`fetch_with_retry`].
    pub index: usize,

    /// Number of requests issued for [`Self::url`], including the successful
    /// one.
    pub attempts: u32,
}

/// Returns true if a response with this status is worth retrying.
///
/// Only rate limiting (429) and the transient server errors (500, 502, 503,
/// 504) qualify. Every other failure status, in particular 404, is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Why a single attempt failed.
enum AttemptFailure {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    Transport(reqwest_middleware::Error),
}

/// Downloads `url`, retrying transient failures according to
/// [`FetchConfig::retry_policy`].
///
/// A 4xx response other than 429 returns immediately with
/// [`FetchError::PermanentStatus`]. For a 429 response a `Retry-After` header
/// (in seconds) replaces the computed delay if it is longer. When the budget
/// is spent, the last failure is wrapped in [`FetchError::RetriesExhausted`]
/// together with the number of attempts.
///
/// Cancelling `cancel` aborts the in-flight request or backoff sleep and
/// returns [`FetchError::Cancelled`].
pub async fn fetch_with_retry(
    url: &Url,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, FetchError> {
    let policy = config.retry_policy();
    let redacted = redact_url(url);
    let request_start = SystemTime::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        tracing::debug!("downloading {redacted} (attempt {attempt})");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { url: redacted }),
            result = fetch_once(&config.client, url, config) => result,
        };

        let (err, retry_after) = match result {
            Ok(bytes) => {
                return Ok(FetchOutcome {
                    bytes,
                    url: url.clone(),
                    index: 0,
                    attempts: attempt,
                })
            }
            Err(AttemptFailure::Status {
                status,
                retry_after,
            }) => {
                if !is_retryable_status(status) {
                    return Err(FetchError::PermanentStatus {
                        url: redacted,
                        status,
                    });
                }
                let retry_after = retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS);
                (
                    FetchError::TransientStatus {
                        url: redacted.clone(),
                        status,
                    },
                    retry_after,
                )
            }
            Err(AttemptFailure::Transport(source)) => {
                let source = redact_error(source);
                if source.is_builder() {
                    return Err(FetchError::Transport {
                        url: redacted,
                        source,
                    });
                }
                (
                    FetchError::Transport {
                        url: redacted.clone(),
                        source,
                    },
                    None,
                )
            }
        };

        let execute_after = match policy.should_retry(request_start, attempt - 1) {
            RetryDecision::Retry { execute_after } => execute_after,
            RetryDecision::DoNotRetry => {
                return Err(FetchError::RetriesExhausted {
                    url: redacted,
                    attempts: attempt,
                    last: Box::new(err),
                })
            }
        };
        let mut delay = execute_after
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after);
        }

        tracing::warn!(
            "failed to download {}: {}. Retry #{}, sleeping {:?} until the next attempt...",
            redacted,
            err,
            attempt,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { url: redacted }),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Downloads the first of `urls` that succeeds.
///
/// Each URL is tried with the full retry policy of [`fetch_with_retry`]
/// before moving to the next one. The returned [`FetchOutcome`] records
/// which URL served the artifact. Cancellation stops the walk immediately.
pub async fn fetch_with_mirrors(
    urls: &[Url],
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, FetchError> {
    let mut last_error = FetchError::NoUrls;
    for (index, url) in urls.iter().enumerate() {
        match fetch_with_retry(url, config, cancel).await {
            Ok(outcome) => {
                if index > 0 {
                    tracing::info!(
                        "downloaded from fallback location #{index} {}",
                        redact_url(url)
                    );
                }
                return Ok(FetchOutcome { index, ..outcome });
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                if index + 1 < urls.len() {
                    tracing::warn!("{err}, trying the next download location");
                }
                last_error = err;
            }
        }
    }

    if urls.is_empty() {
        return Err(last_error);
    }
    Err(FetchError::MirrorsExhausted {
        tried: urls.len(),
        last: Box::new(last_error),
    })
}

async fn fetch_once(
    client: &ClientWithMiddleware,
    url: &Url,
    config: &FetchConfig,
) -> Result<Bytes, AttemptFailure> {
    let response = client
        .get(url.clone())
        .header(header::USER_AGENT, config.user_agent())
        .timeout(config.timeout())
        .send()
        .await
        .map_err(AttemptFailure::Transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(AttemptFailure::Status {
            status,
            retry_after: parse_retry_after(response.headers()),
        });
    }

    response
        .bytes()
        .await
        .map_err(|err| AttemptFailure::Transport(err.into()))
}

/// Parses a `Retry-After` header expressed in whole seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
