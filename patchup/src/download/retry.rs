//! Exponential backoff and request-level retry.

use std::time::Duration;

use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::UpdateResult;

/// Delay before retry number `retry_count` (0-indexed): `base * 2^retry_count`.
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count);
    base.saturating_mul(multiplier)
}

/// Run `op` up to `attempts` times, backing off between retryable failures.
///
/// Non-retryable errors and cancellation return immediately. The backoff
/// sleep observes `cancel`.
pub fn with_retrying<T, F>(
    attempts: u32,
    base: Duration,
    cancel: &CancelToken,
    what: &str,
    mut op: F,
) -> UpdateResult<T>
where
    F: FnMut() -> UpdateResult<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        cancel.check()?;
        attempt += 1;

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = retry_delay(attempt - 1, base);
                warn!(
                    operation = what,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                cancel.sleep(delay)?;
            }
        }
    }
}
