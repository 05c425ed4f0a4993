//! Bounded retry with exponential back-off for provider HTTP calls.
//!
//! * Retries on 5xx status codes, timeouts, and connection errors.
//! * Does **not** retry on 4xx (client errors are permanent).
//! * Exhaustion surfaces the last transient error.

use std::time::Duration;

use ami_domain::error::{Error, Result};
use reqwest::{RequestBuilder, Response};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Execute a request up to `1 + max_retries` times.
///
/// `build_request` is called fresh for every attempt (a `RequestBuilder`
/// is consumed by `send`). Returns the first non-5xx response; a 4xx is
/// returned as-is for the caller to shape into a provider error.
pub async fn send_with_retry(
    endpoint: &str,
    max_retries: u32,
    build_request: impl Fn() -> RequestBuilder,
) -> Result<Response> {
    let mut last_err: Option<Error> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            tracing::debug!(endpoint, attempt, backoff_ms = backoff.as_millis() as u64, "retrying");
            tokio::time::sleep(backoff).await;
        }

        match build_request().send().await {
            Ok(resp) if resp.status().is_server_error() => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                last_err = Some(Error::Http(format!("{endpoint} returned {status}: {body}")));
            }
            Ok(resp) => return Ok(resp),
            Err(e) => {
                last_err = Some(from_reqwest(e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Http(format!("{endpoint}: all retries exhausted"))))
}

/// Resolve an API key from an environment variable.
pub fn key_from_env(var: &str) -> Result<String> {
    std::env::var(var)
        .map_err(|_| Error::Config(format!("environment variable '{var}' is not set")))
}
