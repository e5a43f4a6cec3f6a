//! Error types for the review engine

use thiserror::Error;

/// Result type for review engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for review engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Provider gateway error
    #[error(transparent)]
    Provider(#[from] cr_providers::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// LLM driver failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Sandbox execution exceeded its wall clock
    #[error("sandbox timed out after {0} seconds")]
    SandboxTimeout(u64),

    /// Sandbox process or protocol failure
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// A capability call was refused by the interceptor
    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    /// Model output did not match the required schema
    #[error("parse error: {0}")]
    Parse(String),

    /// Iteration or LLM budget exhausted
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Session cancelled by the caller
    #[error("session cancelled")]
    Cancelled,

    /// Session-wide deadline elapsed
    #[error("session deadline elapsed")]
    Deadline,

    /// Structured answer failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown review id
    #[error("review {0} not found")]
    ReviewNotFound(String),
}

impl Error {
    /// Stable string code carried on error frames and CLI exit mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Provider(e) => e.code(),
            Error::Io(_) => "io",
            Error::Json(_) | Error::Parse(_) => "parse",
            Error::Llm(_) => "llm",
            Error::SandboxTimeout(_) => "sandbox_timeout",
            Error::Sandbox(_) => "sandbox_exec",
            Error::CapabilityDenied(_) => "capability_denied",
            Error::BudgetExceeded(_) => "budget_exceeded",
            Error::Cancelled => "cancelled",
            Error::Deadline => "deadline",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::ReviewNotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_codes_pass_through() {
        let err = Error::from(cr_providers::Error::UrlInvalid("x".into()));
        assert_eq!(err.code(), "url_invalid");
    }

    #[test]
    fn test_core_codes() {
        assert_eq!(Error::SandboxTimeout(30).code(), "sandbox_timeout");
        assert_eq!(Error::Cancelled.code(), "cancelled");
        assert_eq!(Error::Deadline.code(), "deadline");
        assert_eq!(Error::Parse("bad".into()).code(), "parse");
        assert_eq!(Error::BudgetExceeded("llm".into()).code(), "budget_exceeded");
    }
}
