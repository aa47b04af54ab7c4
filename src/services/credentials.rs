// src/services/credentials.rs

//! Credential rotation.
//!
//! Credentials are handed out round-robin, skipping any that are disabled or
//! still rate limited. Rate limits expire lazily: a credential whose reset
//! time has passed becomes available again the next time selection looks at
//! it. Each credential's state sits behind its own lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PoolError;
use crate::models::{Credential, CredentialPoolConfig};
use crate::utils::lock;

/// Mutable bookkeeping for one credential.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CredentialState {
    pub valid: bool,
    pub rate_limited: bool,
    pub rate_limit_reset: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl CredentialState {
    fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    /// Availability check that clears an expired rate limit.
    fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.rate_limited && self.rate_limit_reset.is_none_or(|reset| now >= reset) {
            self.rate_limited = false;
            self.rate_limit_reset = None;
        }
        self.valid && !self.rate_limited
    }

    fn limited_at(&self, now: DateTime<Utc>) -> bool {
        self.rate_limited && self.rate_limit_reset.is_some_and(|reset| now < reset)
    }

    fn wait_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.rate_limit_reset?;
        let micros = (reset - now).num_microseconds().unwrap_or(i64::MAX).max(0) as u64;
        Some(Duration::from_millis(micros.div_ceil(1_000)))
    }
}

/// A credential checked out of the pool.
///
/// Outcomes are reported back through the pool using this handle.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    index: usize,
    credential: Arc<Credential>,
}

impl CredentialHandle {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> String {
        self.credential.label()
    }
}

/// Aggregate pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub invalid: usize,
    pub total_requests: u64,
    pub total_errors: u64,
}

/// Rotating set of credentials.
pub struct CredentialPool {
    credentials: Vec<Arc<Credential>>,
    states: Vec<Mutex<CredentialState>>,
    next: AtomicUsize,
    default_rate_limit: Duration,
    max_consecutive_errors: u32,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>, config: &CredentialPoolConfig) -> Self {
        let states = credentials
            .iter()
            .map(|_| Mutex::new(CredentialState::new()))
            .collect();
        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            states,
            next: AtomicUsize::new(0),
            default_rate_limit: config.default_rate_limit(),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Select the next usable credential.
    pub fn acquire(&self) -> Result<CredentialHandle, PoolError> {
        self.acquire_at(Utc::now())
    }

    /// Select the next usable credential as of `now`.
    pub fn acquire_at(&self, now: DateTime<Utc>) -> Result<CredentialHandle, PoolError> {
        let total = self.credentials.len();
        if total == 0 {
            return Err(PoolError::NoCredentials);
        }

        let start = self.next.load(Ordering::Relaxed) % total;
        let mut shortest_wait: Option<Duration> = None;
        for offset in 0..total {
            let index = (start + offset) % total;
            let mut state = lock(&self.states[index]);
            if state.refresh(now) {
                drop(state);
                self.next.store((index + 1) % total, Ordering::Relaxed);
                return Ok(CredentialHandle {
                    index,
                    credential: Arc::clone(&self.credentials[index]),
                });
            }
            if let Some(wait) = state.wait_at(now).filter(|_| state.valid) {
                shortest_wait = Some(shortest_wait.map_or(wait, |w| w.min(wait)));
            }
        }

        match shortest_wait {
            Some(retry_after) => Err(PoolError::Exhausted { retry_after }),
            None => Err(PoolError::NoCredentials),
        }
    }

    /// Select a credential, sleeping once for the earliest reset when all
    /// are rate limited and the wait fits within `max_wait`.
    pub async fn acquire_or_wait(&self, max_wait: Duration) -> Result<CredentialHandle, PoolError> {
        match self.acquire() {
            Err(PoolError::Exhausted { retry_after }) if retry_after <= max_wait => {
                log::info!(
                    "All credentials rate limited, waiting {}s",
                    retry_after.as_secs()
                );
                tokio::time::sleep(retry_after).await;
                self.acquire()
            }
            other => other,
        }
    }

    pub fn report_success(&self, handle: &CredentialHandle) {
        let mut state = lock(&self.states[handle.index]);
        state.consecutive_errors = 0;
        state.request_count += 1;
        state.last_used = Some(Utc::now());
    }

    /// Mark a credential rate limited for `reset_after` (default window if `None`).
    pub fn report_rate_limited(&self, handle: &CredentialHandle, reset_after: Option<Duration>) {
        self.report_rate_limited_at(handle, reset_after, Utc::now());
    }

    pub fn report_rate_limited_at(
        &self,
        handle: &CredentialHandle,
        reset_after: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        let window = reset_after.unwrap_or(self.default_rate_limit);
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let reset = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = lock(&self.states[handle.index]);
        state.rate_limited = true;
        state.rate_limit_reset = Some(reset);
        state.request_count += 1;
        state.last_used = Some(now);
        log::warn!(
            "Credential {} rate limited until {}",
            handle.label(),
            reset.to_rfc3339()
        );
    }

    /// Permanently disable a credential.
    pub fn report_invalid(&self, handle: &CredentialHandle) {
        let mut state = lock(&self.states[handle.index]);
        if state.valid {
            log::error!("Credential {} disabled", handle.label());
        }
        state.valid = false;
        state.request_count += 1;
        state.error_count += 1;
    }

    pub fn report_error(&self, handle: &CredentialHandle) {
        let mut state = lock(&self.states[handle.index]);
        state.request_count += 1;
        state.error_count += 1;
        state.consecutive_errors += 1;
        state.last_used = Some(Utc::now());
        if state.consecutive_errors == self.max_consecutive_errors {
            log::warn!(
                "Credential {} degraded: {} consecutive errors",
                handle.label(),
                state.consecutive_errors
            );
        }
    }

    /// Counters as of now; does not clear expired rate limits.
    pub fn stats(&self) -> PoolStats {
        let now = Utc::now();
        let mut stats = PoolStats {
            total: self.credentials.len(),
            ..PoolStats::default()
        };
        for cell in &self.states {
            let state = lock(cell);
            stats.total_requests += state.request_count;
            stats.total_errors += state.error_count;
            if !state.valid {
                stats.invalid += 1;
            } else if state.limited_at(now) {
                stats.rate_limited += 1;
            } else {
                stats.available += 1;
            }
        }
        stats
    }

    /// Snapshot of one credential's state.
    pub fn state(&self, handle: &CredentialHandle) -> CredentialState {
        lock(&self.states[handle.index]).clone()
    }

    /// Clear every rate limit; disabled credentials stay disabled.
    pub fn reset_rate_limits(&self) {
        for cell in &self.states {
            let mut state = lock(cell);
            state.rate_limited = false;
            state.rate_limit_reset = None;
        }
        log::info!("Credential rate limits cleared");
    }

    /// Restore every credential to its initial state.
    pub fn reset_all(&self) {
        for cell in &self.states {
            *lock(cell) = CredentialState::new();
        }
        self.next.store(0, Ordering::Relaxed);
        log::info!("Credential pool reset");
    }
}
