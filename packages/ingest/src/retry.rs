//! Bounded exponential backoff.

use std::fmt::Display;
use std::future::Future;

use govdata_ingest_models::RetryPolicy;

use crate::clock::Clock;

/// Runs `op` until it succeeds or `policy.max_retries` attempts have been
/// made, sleeping `policy.delay_for(attempt)` on `clock` between attempts.
///
/// `op` receives the 1-based attempt number. When every attempt fails the
/// last error is returned.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                log::error!("{label}: giving up after {attempt} attempt(s): {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "{label}: attempt {attempt} failed ({e}), retrying in {}ms",
                    delay.as_millis()
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::FakeClock;

    fn clock() -> FakeClock {
        FakeClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let clock = clock();
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> =
            with_backoff(&RetryPolicy::default(), &clock, "test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let clock = clock();

        let result: Result<(), String> =
            with_backoff(&RetryPolicy::default(), &clock, "test", |attempt| async move {
                Err(format!("failure {attempt}"))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let clock = clock();
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = with_backoff(&policy, &clock, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
