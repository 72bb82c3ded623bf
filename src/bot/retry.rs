//! Bounded retry for rate-limited upstream calls.
//!
//! Only HTTP 429 is retried: at most [`MAX_ATTEMPTS`] attempts total, sleeping
//! the provider's Retry-After hint when present, else exponential backoff from
//! a 1-second base. Anything else is returned to the caller as-is.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

use crate::error::BotError;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for provider-advertised waits, so a hostile hint can't stall a
/// webhook worker for minutes.
const MAX_HINT: Duration = Duration::from_secs(30);

/// Send a request, retrying rate-limited responses within the attempt cap.
///
/// `build` is invoked once per attempt since a `RequestBuilder` is consumed
/// by `send`.
pub async fn send_with_retry<F>(build: F) -> Result<Response, BotError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = build()
            .send()
            .await
            .map_err(|e| BotError::Upstream(format!("request failed: {e}")))?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= MAX_ATTEMPTS {
            return Err(BotError::Upstream(
                "rate limited and retry attempts exhausted".to_string(),
            ));
        }

        let delay = retry_after(&response).unwrap_or_else(|| backoff_delay(attempt));
        warn!(
            "rate limited, retrying in {:?} (attempt {attempt}/{MAX_ATTEMPTS})",
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// Exponential backoff from the 1-second base: 1s after the first attempt,
/// 2s after the second.
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt - 1)
}

/// The Retry-After response header as a duration, when parseable as seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    let secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_HINT))
}
