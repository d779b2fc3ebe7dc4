//! Fetching with per-attempt timeout and exponential backoff.

use std::time::Duration;

use tracing::{debug, warn};

use badgecast_core::{BadgeCount, BadgeFetcher, FetchError};

use crate::config::BroadcasterConfig;

/// Fetch the badge, retrying retryable failures up to
/// `refresh_max_attempts` total attempts.
pub async fn fetch_with_retry(
    fetcher: &dyn BadgeFetcher,
    config: &BroadcasterConfig,
) -> Result<BadgeCount, FetchError> {
    let max_attempts = config.refresh_max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(config.refresh_timeout, fetcher.fetch_badge()).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match result {
            Ok(count) => {
                debug!(attempt, count = count.count, "badge fetched");
                return Ok(count);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = retry_delay(config, attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "badge fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// base * 2^(attempt-1), capped at the configured maximum.
fn retry_delay(config: &BroadcasterConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config
        .refresh_base_delay
        .saturating_mul(factor)
        .min(config.refresh_max_delay)
}
