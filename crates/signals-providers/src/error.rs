use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No data available for {symbol} ({interval})")]
    NoData { symbol: String, interval: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("IP banned, retry after {retry_after_secs}s")]
    Banned { retry_after_secs: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Gave up after {attempts} attempt(s): {}", .errors.join("; "))]
    RetriesExhausted {
        attempts: usize,
        errors: Vec<String>,
        /// The last attempt was a rate-limit or ban rejection.
        rejected: bool,
    },

    #[error("Request gate closed")]
    GateClosed,
}

impl ProviderError {
    /// Worth retrying at the call site.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::NoData { .. }
            | ProviderError::RateLimited { .. }
            | ProviderError::Banned { .. } => true,
            _ => false,
        }
    }

    /// The server asked us to back off (429 or 418), directly or on the final retry.
    pub fn is_rejection(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Banned { .. } => true,
            ProviderError::RetriesExhausted { rejected, .. } => *rejected,
            _ => false,
        }
    }

    /// Delay the server demanded before the next request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after_secs }
            | ProviderError::Banned { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Notifier configuration error: {0}")]
    Config(String),

    #[error("{failed} of {total} deliveries failed: {last}")]
    Partial {
        failed: usize,
        total: usize,
        last: String,
    },
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Http(e) => e.is_timeout() || e.is_connect(),
            NotifyError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
