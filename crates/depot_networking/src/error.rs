use http::StatusCode;
use url::Url;

/// An error that can occur while downloading an artifact.
///
/// URLs stored in this error have their credentials redacted.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a status that retrying cannot fix (4xx other
    /// than 429). Returned immediately, without spending the retry budget.
    #[error("{url} responded with {status}")]
    PermanentStatus {
        /// The requested URL.
        url: Url,
        /// The status returned by the server.
        status: StatusCode,
    },

    /// The server answered with a status that may succeed later (429, 5xx).
    #[error("{url} responded with {status}")]
    TransientStatus {
        /// The requested URL.
        url: Url,
        /// The status returned by the server.
        status: StatusCode,
    },

    /// The request could not be completed (connection failure, timeout,
    /// truncated body).
    #[error("request to {url} failed")]
    Transport {
        /// The requested URL.
        url: Url,
        /// The underlying client error.
        #[source]
        source: reqwest_middleware::Error,
    },

    /// The retry budget was spent without a successful response.
    #[error("giving up on {url} after {attempts} attempts")]
    RetriesExhausted {
        /// The requested URL.
        url: Url,
        /// The total number of requests that were issued.
        attempts: u32,
        /// The failure of the last attempt.
        #[source]
        last: Box<FetchError>,
    },

    /// Every candidate URL failed.
    #[error("all {tried} download locations failed")]
    MirrorsExhausted {
        /// The number of URLs that were tried.
        tried: usize,
        /// The failure of the last URL.
        #[source]
        last: Box<FetchError>,
    },

    /// No URL was given to download from.
    #[error("no download urls were provided")]
    NoUrls,

    /// The operation was cancelled through its cancellation token.
    #[error("fetching {url} was cancelled")]
    Cancelled {
        /// The URL that was being fetched.
        url: Url,
    },
}

impl FetchError {
    /// The HTTP status that caused this error, looking through retry and
    /// mirror wrappers.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::PermanentStatus { status, .. }
            | FetchError::TransientStatus { status, .. } => Some(*status),
            FetchError::Transport { source, .. } => source.status(),
            FetchError::RetriesExhausted { last, .. }
            | FetchError::MirrorsExhausted { last, .. } => last.status(),
            FetchError::NoUrls | FetchError::Cancelled { .. } => None,
        }
    }

    /// Returns true if the artifact does not exist at the requested location.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Returns true if the failure was caused by a condition that may clear up
    /// on its own (timeouts, connection problems, 429 or 5xx responses).
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::TransientStatus { .. }
            | FetchError::Transport { .. }
            | FetchError::RetriesExhausted { .. } => true,
            FetchError::MirrorsExhausted { last, .. } => last.is_transient(),
            FetchError::PermanentStatus { .. }
            | FetchError::NoUrls
            | FetchError::Cancelled { .. } => false,
        }
    }

    /// Returns true if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}
