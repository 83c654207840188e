//! Response status checks shared by the HTTP adapters.

use crate::error::ScanError;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Returns the response unchanged on success.
///
/// 429 becomes [`ScanError::RateLimited`] (honouring `Retry-After`, 60 s
/// when absent or unparseable); any other non-success status becomes
/// [`ScanError::Api`] carrying the response body.
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ScanError> {
    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ScanError::RateLimited {
            retry_after_secs: parse_retry_after(&resp),
        });
    }
    if !resp.status().is_success() {
        return Err(ScanError::Api {
            status: resp.status().as_u16(),
            message: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp)
}

fn parse_retry_after(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
