//! Bounded retries with exponential backoff and jitter
//!
//! Tracker status writes race with other writers and fail with optimistic
//! concurrency conflicts. Those are retried; every other error is returned
//! on the first attempt.
//!
//! ```ignore
//! use feature_common::retry::{retry_with_backoff_if, RetryConfig};
//!
//! retry_with_backoff_if(
//!     &RetryConfig::status_update(),
//!     "update_tracker_status",
//!     Error::is_conflict,
//!     || async { write_status().await },
//! ).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff schedule for a retried operation
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts before giving up, the first one included; at least 1
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Factor applied to the delay after every failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::status_update()
    }
}

impl RetryConfig {
    /// Preset for tracker status writes
    pub fn status_update() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before the attempt following `failures` failed ones, without
    /// jitter
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Scale a delay by a random factor between 0.5 and 1.5
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or runs out of attempts. The last error is returned.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        failures += 1;

        if !should_retry(&e) {
            return Err(e);
        }
        if failures >= max_attempts {
            error!(
                operation = %operation_name,
                attempts = failures,
                error = %e,
                "Giving up after retries"
            );
            return Err(e);
        }

        let delay = jittered(config.base_delay(failures));
        warn!(
            operation = %operation_name,
            attempt = failures,
            error = %e,
            delay_ms = delay.as_millis(),
            "Retrying after failure"
        );
        tokio::time::sleep(delay).await;
    }
}
