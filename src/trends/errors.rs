//! Error types for the Trends client.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TrendsError {
    #[error("upstream rate limited the request (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("no geography code configured for '{0}'")]
    UnknownGeo(String),
    #[error("explore response had no {0} widget")]
    MissingWidget(&'static str),
    #[error("failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl TrendsError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TrendsError::RateLimited { .. })
    }

    /// Not retryable: the sub-query can never succeed with the current configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TrendsError::UnknownGeo(_))
    }
}
