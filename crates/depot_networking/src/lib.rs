#![deny(missing_docs)]

//! Networking utilities for depot, specifically downloading artifacts from
//! package registries with bounded retries and mirror fallback.
//!
//! The entry points are [`fetch_with_retry`], which downloads a single URL
//! under a [`retry_policies::LinearBackoff`] policy, and
//! [`fetch_with_mirrors`], which walks an ordered list of candidate URLs and
//! returns the first one that succeeds together with its position.
//!
//! Every network-bound call takes a [`CancellationToken`]. Cancelling it
//! aborts an in-flight request or backoff sleep immediately.
//!
//! Note that the per-attempt timeout in [`FetchConfig`] bounds a *single*
//! attempt. A fetch with four attempts and a 30 second timeout may run for
//! two minutes plus the backoff delays; callers with an outer deadline should
//! enforce it through the cancellation token.

pub use config::{
    FetchConfig, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};
pub use error::FetchError;
pub use fetch::{fetch_with_mirrors, fetch_with_retry, is_retryable_status, FetchOutcome};
pub use tokio_util::sync::CancellationToken;

mod config;
mod error;
mod fetch;
pub mod retry_policies;

mod redaction;

pub use redaction::{redact_url, DEFAULT_REDACTION_STR};
