// src/pipeline/retry.rs

//! Per-request retry loop driven by [`Disposition`].

use std::future::Future;

use crate::error::{Disposition, PoolError, RequestError};
use crate::models::RetryConfig;
use crate::utils::backoff::Backoff;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::from(config),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable disposition,
    /// or `max_attempts` is reached. Returns the last error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;
            if err.disposition() != Disposition::Retry || attempt >= self.max_attempts {
                return Err(err);
            }

            // 429s rotate to another credential, so only local waits are honored.
            let hint = match &err {
                RequestError::Backpressure { retry_after, .. }
                | RequestError::Pool(PoolError::Exhausted { retry_after }) => Some(*retry_after),
                _ => None,
            };
            let delay = self.backoff.delay_with_hint(attempt - 1, hint);
            log::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                what,
                attempt,
                self.max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Backoff::Fixed {
                delay: Duration::from_millis(10),
            },
        )
    }

    fn transport_error() -> RequestError {
        RequestError::Transport {
            endpoint: "Following".into(),
            message: "connection reset".into(),
            timeout: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("page", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transport_error())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(3)
            .run("page", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transport_error())
            })
            .await;
        assert_eq!(result, Err(transport_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("page", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Pool(PoolError::NoCredentials))
            })
            .await;
        assert_eq!(result, Err(RequestError::Pool(PoolError::NoCredentials)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_waits_for_hint() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = policy(2)
            .run("page", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RequestError::Pool(PoolError::Exhausted {
                        retry_after: Duration::from_secs(5),
                    }))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
