// src/services/proxies.rs

//! Health-scored proxy rotation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::ProxyError;
use crate::models::ProxyPoolConfig;
use crate::utils::{lock, mask_url};

/// Rolling health of one proxy since the last reset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyState {
    pub successes: u64,
    pub checks: u64,
    pub last_latency: Option<Duration>,
}

impl ProxyState {
    /// Unchecked proxies count as healthy.
    pub fn success_rate(&self) -> f64 {
        if self.checks == 0 {
            1.0
        } else {
            self.successes as f64 / self.checks as f64
        }
    }
}

/// A proxy checked out of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHandle {
    index: usize,
    url: String,
}

impl ProxyHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Per-proxy status for display, with the URL masked.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub url: String,
    pub success_rate: f64,
    pub checks: u64,
    pub last_latency_ms: Option<u128>,
}

struct ProxyEntry {
    url: String,
    state: Mutex<ProxyState>,
}

/// Rotating set of outbound proxies.
pub struct ProxyPool {
    proxies: Vec<ProxyEntry>,
    next: AtomicUsize,
    min_success_rate: f64,
    hard_floor: f64,
    min_samples: u64,
}

impl ProxyPool {
    pub fn new(urls: Vec<String>, config: &ProxyPoolConfig) -> Self {
        Self {
            proxies: urls
                .into_iter()
                .map(|url| ProxyEntry {
                    url,
                    state: Mutex::new(ProxyState::default()),
                })
                .collect(),
            next: AtomicUsize::new(0),
            min_success_rate: config.min_success_rate,
            hard_floor: config.hard_floor,
            min_samples: config.min_samples,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Next healthy proxy in rotation, else the best remaining one.
    pub fn select(&self) -> Result<ProxyHandle, ProxyError> {
        let total = self.proxies.len();
        if total == 0 {
            return Err(ProxyError::NoHealthyProxy);
        }

        let start = self.next.load(Ordering::Relaxed) % total;
        let mut best: Option<(usize, f64, Duration)> = None;
        for offset in 0..total {
            let index = (start + offset) % total;
            let state = lock(&self.proxies[index].state);
            let rate = state.success_rate();
            if rate >= self.min_success_rate {
                drop(state);
                self.next.store((index + 1) % total, Ordering::Relaxed);
                return Ok(self.handle(index));
            }
            if rate <= self.hard_floor && state.checks >= self.min_samples {
                continue;
            }
            let latency = state.last_latency.unwrap_or(Duration::MAX);
            let better = match best {
                None => true,
                Some((_, best_rate, best_latency)) => {
                    rate > best_rate || (rate == best_rate && latency < best_latency)
                }
            };
            if better {
                best = Some((index, rate, latency));
            }
        }

        match best {
            Some((index, rate, _)) => {
                log::debug!(
                    "No proxy above {:.2}, falling back to {} ({:.2})",
                    self.min_success_rate,
                    mask_url(&self.proxies[index].url),
                    rate
                );
                Ok(self.handle(index))
            }
            None => Err(ProxyError::NoHealthyProxy),
        }
    }

    pub fn report_success(&self, handle: &ProxyHandle, latency: Duration) {
        let mut state = lock(&self.proxies[handle.index].state);
        state.successes += 1;
        state.checks += 1;
        state.last_latency = Some(latency);
    }

    pub fn report_failure(&self, handle: &ProxyHandle, latency: Option<Duration>) {
        let mut state = lock(&self.proxies[handle.index].state);
        state.checks += 1;
        if latency.is_some() {
            state.last_latency = latency;
        }
        if state.checks >= 3 && state.success_rate() < self.min_success_rate {
            log::warn!(
                "Proxy {} unhealthy: success rate {:.2}",
                mask_url(&handle.url),
                state.success_rate()
            );
        }
    }

    pub fn stats(&self) -> Vec<ProxyStats> {
        self.proxies
            .iter()
            .map(|entry| {
                let state = lock(&entry.state);
                ProxyStats {
                    url: mask_url(&entry.url),
                    success_rate: state.success_rate(),
                    checks: state.checks,
                    last_latency_ms: state.last_latency.map(|d| d.as_millis()),
                }
            })
            .collect()
    }

    /// Forget all health history.
    pub fn reset(&self) {
        for entry in &self.proxies {
            *lock(&entry.state) = ProxyState::default();
        }
        self.next.store(0, Ordering::Relaxed);
    }

    fn handle(&self, index: usize) -> ProxyHandle {
        ProxyHandle {
            index,
            url: self.proxies[index].url.clone(),
        }
    }
}
