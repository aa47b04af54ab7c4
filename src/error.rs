// src/error.rs

//! Unified error handling for the crawler and ranking pipeline.
//!
//! Request-level failures are modelled as [`RequestError`] values carrying a
//! [`Disposition`], so call sites branch on the variant instead of unwinding.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be constructed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Graph construction or ranking failure
    #[error("Graph error: {message} (nodes: {node_count}, edges: {edge_count})")]
    Graph {
        message: String,
        node_count: usize,
        edge_count: usize,
    },

    /// Upstream request failure that escaped a call site
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a graph error carrying the graph's size.
    pub fn graph(message: impl Into<String>, node_count: usize, edge_count: usize) -> Self {
        Self::Graph {
            message: message.into(),
            node_count,
            edge_count,
        }
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Credential pool selection failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every valid credential is rate limited; the earliest frees up after `retry_after`.
    #[error("All credentials rate limited, retry after {}s", retry_after.as_secs())]
    Exhausted { retry_after: Duration },

    /// No valid credential remains (or none were configured).
    #[error("No valid credentials left in pool")]
    NoCredentials,
}

/// Proxy pool selection failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("No healthy proxies available")]
    NoHealthyProxy,
}

/// Account condition reported by the upstream API through a 403 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    NeedsVerification,
    Suspended,
    Locked,
    CsrfMismatch,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountState::NeedsVerification => "needs verification",
            AccountState::Suspended => "suspended",
            AccountState::Locked => "locked",
            AccountState::CsrfMismatch => "csrf mismatch",
        };
        f.write_str(name)
    }
}

/// How the caller of a single request should react to its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: retry after backoff, possibly on another credential.
    Retry,
    /// Permanent for this request: give up on the item, keep crawling.
    SkipNode,
    /// Pool-wide: stop the crawl.
    Fatal,
}

/// Typed outcome of a failed upstream request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// 429 or payload-level rate limit.
    #[error("Rate limited on {endpoint}, retry after {}s", retry_after.as_secs())]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },

    /// Local budget (token bucket) refused the call.
    #[error("Local rate budget for {category} empty, retry after {}ms", retry_after.as_millis())]
    Backpressure {
        category: String,
        retry_after: Duration,
    },

    /// 401: the credential used has been disabled.
    #[error("Authentication failed on {endpoint}")]
    Authentication { endpoint: String },

    /// 403, optionally mapped to a known account state.
    #[error("Forbidden on {endpoint}{}", state.map(|s| format!(" ({s})")).unwrap_or_default())]
    Forbidden {
        endpoint: String,
        state: Option<AccountState>,
        code: Option<u32>,
    },

    /// Network failure or timeout.
    #[error("Transport error on {endpoint}: {message}")]
    Transport {
        endpoint: String,
        message: String,
        timeout: bool,
    },

    /// Any other non-2xx or unusable payload.
    #[error("Scraping error on {endpoint}: status {status}: {message}")]
    Scraping {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Credential pool could not provide a credential.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Proxy pool could not provide a proxy.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl RequestError {
    /// Classify the failure for the caller's retry policy.
    pub fn disposition(&self) -> Disposition {
        match self {
            RequestError::RateLimited { .. }
            | RequestError::Backpressure { .. }
            | RequestError::Transport { .. }
            | RequestError::Authentication { .. }
            | RequestError::Pool(PoolError::Exhausted { .. }) => Disposition::Retry,
            // Client errors describe the target, not the session.
            RequestError::Scraping { status, .. } if (400..500).contains(status) => {
                Disposition::SkipNode
            }
            RequestError::Scraping { .. } => Disposition::Retry,
            // A mapped state describes the credential's account, another credential may pass.
            RequestError::Forbidden { state: Some(_), .. } => Disposition::Retry,
            RequestError::Forbidden { state: None, .. } => Disposition::SkipNode,
            RequestError::Pool(PoolError::NoCredentials) | RequestError::Proxy(_) => {
                Disposition::Fatal
            }
        }
    }

    /// Server- or pool-suggested minimum wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RequestError::RateLimited { retry_after, .. }
            | RequestError::Backpressure { retry_after, .. }
            | RequestError::Pool(PoolError::Exhausted { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }

    /// HTTP status associated with the failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::RateLimited { .. } => Some(429),
            RequestError::Authentication { .. } => Some(401),
            RequestError::Forbidden { .. } => Some(403),
            RequestError::Scraping { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_by_variant() {
        let rate_limited = RequestError::RateLimited {
            endpoint: "Following".into(),
            retry_after: Duration::from_secs(10),
        };
        assert_eq!(rate_limited.disposition(), Disposition::Retry);
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(10)));

        let no_creds = RequestError::from(PoolError::NoCredentials);
        assert_eq!(no_creds.disposition(), Disposition::Fatal);

        let exhausted = RequestError::from(PoolError::Exhausted {
            retry_after: Duration::from_secs(3),
        });
        assert_eq!(exhausted.disposition(), Disposition::Retry);

        let suspended = RequestError::Forbidden {
            endpoint: "Following".into(),
            state: Some(AccountState::Suspended),
            code: Some(64),
        };
        assert_eq!(suspended.disposition(), Disposition::Retry);
        assert_eq!(suspended.status(), Some(403));

        let protected = RequestError::Forbidden {
            endpoint: "Following".into(),
            state: None,
            code: None,
        };
        assert_eq!(protected.disposition(), Disposition::SkipNode);

        let not_found = RequestError::Scraping {
            endpoint: "UserByRestId".into(),
            status: 404,
            message: "User not found".into(),
        };
        assert_eq!(not_found.disposition(), Disposition::SkipNode);

        let server = RequestError::Scraping {
            endpoint: "Following".into(),
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(server.disposition(), Disposition::Retry);
    }

    #[test]
    fn test_forbidden_message_includes_state() {
        let err = RequestError::Forbidden {
            endpoint: "Following".into(),
            state: Some(AccountState::NeedsVerification),
            code: Some(326),
        };
        assert_eq!(err.to_string(), "Forbidden on Following (needs verification)");

        let bare = RequestError::Forbidden {
            endpoint: "Following".into(),
            state: None,
            code: None,
        };
        assert_eq!(bare.to_string(), "Forbidden on Following");
    }

    #[test]
    fn test_graph_error_display() {
        let err = AppError::graph("PageRank did not converge", 3, 2);
        assert_eq!(
            err.to_string(),
            "Graph error: PageRank did not converge (nodes: 3, edges: 2)"
        );
    }
}
