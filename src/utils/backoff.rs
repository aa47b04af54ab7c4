//! Exponential backoff with jitter for per-page retries.

use std::time::Duration;

use crate::models::RetryConfig;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every attempt.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = seconds.min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(capped);

                if !jitter {
                    return delay;
                }
                let millis = delay.as_millis() as u64;
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread * 2);
                Duration::from_millis((millis + offset).saturating_sub(spread))
            }
        }
    }

    /// Delay honoring a server hint: never shorter than `hint`.
    pub fn delay_with_hint(self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.delay(attempt);
        hint.map_or(computed, |hint| computed.max(hint))
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self::Exponential {
            base: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}
