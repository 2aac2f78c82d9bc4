// Retry with exponential backoff for client requests.
//
// Retries: network errors, timeouts, 5xx and 429.
// Does NOT retry: other 4xx, validation, missing session.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ClientError;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 10_000;
const JITTER_FRACTION: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    /// Upper bound on a single attempt. `None` leaves it to the transport.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `jitter_sample` is in `[0, 1)`; the result is
    /// `min(base * 2^attempt * (1 + jitter_fraction * jitter_sample), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exp = 2f64.powi(attempt.min(32) as i32);
        let base_ms = self.base_delay.as_millis() as f64 * exp;
        let jitter = 1.0 + self.jitter_fraction * jitter_sample.clamp(0.0, 1.0);
        let capped_ms = (base_ms * jitter).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }

    fn next_delay(&self, attempt: u32, error: &ClientError) -> Duration {
        // Honour the server's hint, within our own cap.
        if let ClientError::RateLimited {
            retry_after: Some(hint),
        } = error
        {
            return (*hint).min(self.max_delay);
        }
        self.delay_for_attempt(attempt, rand::thread_rng().gen_range(0.0..1.0))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the retry
/// budget runs out. The closure receives the 0-indexed attempt number.
///
/// Non-retryable errors are returned unchanged. Running out of retries yields
/// [`ClientError::RetriesExhausted`] carrying the last error.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ClientError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;

    loop {
        let result = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(limit)),
            },
            None => op(attempt).await,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= config.max_retries {
            return Err(ClientError::RetriesExhausted {
                attempts: attempt + 1,
                last: Box::new(error),
            });
        }

        let delay = config.next_delay(attempt, &error);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying after error: {}",
            error
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_fraction: 0.3,
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0, 0.0), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(1, 0.0), Duration::from_millis(2_000));
        assert_eq!(config.delay_for_attempt(2, 0.0), Duration::from_millis(4_000));
    }

    #[test]
    fn test_jitter_adds_at_most_thirty_percent() {
        let config = RetryConfig::default();
        let d = config.delay_for_attempt(1, 0.999_999);
        assert!(d >= Duration::from_millis(2_000));
        assert!(d <= Duration::from_millis(2_600));
    }

    #[test]
    fn test_delay_bounds_for_every_attempt() {
        let config = RetryConfig {
            max_retries: 12,
            ..RetryConfig::default()
        };
        let mut rng = rand::thread_rng();
        for attempt in 0..=config.max_retries {
            let sample: f64 = rng.gen_range(0.0..1.0);
            let d = config.delay_for_attempt(attempt, sample);
            let floor = (config.base_delay * 2u32.pow(attempt)).min(config.max_delay);
            assert!(d >= floor, "attempt {} delay {:?} below {:?}", attempt, d, floor);
            assert!(d <= config.max_delay, "attempt {} delay {:?} above cap", attempt, d);
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(10, 0.5), config.max_delay);
        assert_eq!(config.delay_for_attempt(40, 0.5), config.max_delay);
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let config = fast_config();
        let err = ClientError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(config.next_delay(0, &err), config.max_delay);

        let err = ClientError::RateLimited {
            retry_after: Some(Duration::from_millis(250)),
        };
        assert_eq!(config.next_delay(0, &err), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(&fast_config(), move |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ClientError::Network("connection reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(&fast_config(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClientError::Client {
                    status: 400,
                    code: "EMPTY_MESSAGE".into(),
                    message: "empty".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::Client { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_error_and_count() {
        let result: Result<(), _> = retry(&fast_config(), |attempt| async move {
            Err(ClientError::Server {
                status: 500 + attempt as u16,
                code: "INTERNAL".into(),
                message: "boom".into(),
            })
        })
        .await;

        match result {
            Err(ClientError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, ClientError::Server { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_retryable() {
        let config = RetryConfig {
            max_retries: 1,
            attempt_timeout: Some(Duration::from_millis(50)),
            ..fast_config()
        };

        let result: Result<(), _> = retry(&config, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ClientError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ClientError::Timeout(d) if d == Duration::from_millis(50)));
            }
            other => panic!("expected timeout exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let config = RetryConfig {
            max_retries: 0,
            ..fast_config()
        };
        let result: Result<(), _> =
            retry(&config, |_| async { Err(ClientError::Network("down".into())) }).await;
        assert!(matches!(result, Err(ClientError::RetriesExhausted { attempts: 1, .. })));
    }
}
