//! HTTP retry helpers for idempotent backend reads.
//!
//! Reads (snapshot fetches, change-feed polls, route lookups) go through
//! [`send_json`] so transient failures (timeouts, connection resets, HTTP
//! 429 and 5xx) are retried with exponential backoff. Vote writes do not
//! use this module: a failed write is rolled back locally instead.
//!
//! # Usage
//!
//! ```ignore
//! let body = retry::send_json(|| client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use crate::BackendError;

/// Maximum number of retry attempts for transient errors.
///
/// With exponential backoff (0.5s, 1s, 2s) the total wait before giving up
/// is 3.5 seconds on top of the per-request timeouts.
const MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles on every further attempt.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum length of the response body kept in error messages.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends a request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// Does **not** retry HTTP 4xx other than 429; those are permanent.
///
/// # Errors
///
/// Returns [`BackendError`] if the request still fails after all retries,
/// the server answers with a non-retryable status, or the body is not JSON.
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let response = send_with_retry(&build_request, MAX_RETRIES).await?;
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Core retry loop. Returns the first response with a non-error status.
async fn send_with_retry<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(BackendError::Http(e));
            }
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    return Ok(response);
                }
                if is_retryable_status(status) && attempt < max_retries {
                    log::warn!("  HTTP {status} from {}", response.url());
                    attempt += 1;
                    continue;
                }
                return Err(status_error(response).await);
            }
        }
    }
}

/// Converts a non-success response into [`BackendError::Status`], keeping a
/// preview of the body for diagnostics.
pub(crate) async fn status_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    BackendError::Status {
        status,
        body: preview(&body),
    }
}

fn preview(body: &str) -> String {
    if body.len() <= BODY_PREVIEW_LEN {
        return body.to_string();
    }
    let mut end = BODY_PREVIEW_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    BASE_DELAY * (1u32 << attempt.saturating_sub(1).min(16))
}

/// Returns `true` for statuses worth retrying: 429 and all 5xx.
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
