//! Error types for provider operations

use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a hosting provider
#[derive(Error, Debug)]
pub enum Error {
    /// The URL does not match any supported provider pattern
    #[error("invalid pull request URL: {0}")]
    UrlInvalid(String),

    /// The requested resource does not exist at the provider
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected or are required
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exhausted after retries
    #[error("rate limited by provider")]
    RateLimited {
        /// Retry-after hint from the provider, in seconds
        retry_after_secs: Option<u64>,
    },

    /// Transport-level failure (connection, TLS, malformed body)
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Stable string code surfaced in the public answer schema.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UrlInvalid(_) => "url_invalid",
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::RateLimited { .. } => "rate_limited",
            Error::Transport(_) => "transport",
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
