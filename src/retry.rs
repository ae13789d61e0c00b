use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

macro_rules! retry_db_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY_SECS: u64 = 3;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_DELAY_SECS)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_db_operation;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based), with +/-25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        let jitter_range = (delay_ms as f64 * 0.25) as u64;
        let jitter = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis(delay_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

/// Run an async operation until it succeeds or the attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(context: &str, backoff: Backoff, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..backoff.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 < backoff.max_attempts {
                    let delay = backoff.delay_for(attempt);
                    log::debug!(
                        "{}: attempt {} failed ({}), retrying in {}ms",
                        context,
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{}: retry_with_backoff exhausted attempts", context)))
}
