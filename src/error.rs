//! Typed errors that callers need to match on.
//!
//! Everything else travels as `anyhow::Error` with context attached.

use thiserror::Error;

/// A run-wide cancellation reached a suspension point.
///
/// This is the only error the production fetcher returns. Region and page
/// boundaries swallow every other failure but must re-raise this one.
#[derive(Debug, Clone, Error)]
#[error("cancelled while fetching {url}")]
pub struct Cancelled {
    pub url: String,
}

impl Cancelled {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_concurrent_fetches must be at least 1")]
    NoWorkers,

    #[error("retries must be at least 1")]
    NoRetries,

    #[error("{name} must be a finite, non-negative number of seconds (got {value})")]
    InvalidSeconds { name: &'static str, value: f64 },

    #[error("invalid fallback_link_pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Returns true if the error chain carries a [`Cancelled`] signal.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}
