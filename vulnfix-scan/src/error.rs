//! Scanner error types.

use thiserror::Error;

/// Errors raised while fetching alert records.
#[derive(Debug, Error)]
pub enum ScanError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The alert API returned a non-success status code.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The alert API returned 429 Too Many Requests.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A response line could not be read.
    #[error("stream decode error: {0}")]
    Decode(String),

    /// A response line was not a valid artifact record.
    #[error("invalid artifact record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scan cancelled")]
    Cancelled,
}
