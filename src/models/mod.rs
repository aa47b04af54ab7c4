// src/models/mod.rs

//! Domain models for the crawler application.
//!
//! Accounts and edges flow from the crawler into storage, rankings flow out
//! of the graph pipeline, and checkpoints make crawls resumable.

mod config;
mod credential;
mod frontier;
mod ranking;
mod user;

// Re-export all public types
pub use config::{
    AnalysisConfig, ApiConfig, BucketConfig, Config, CrawlerConfig, CredentialPoolConfig,
    ForbiddenCode, PageRankConfig, ProxyPoolConfig, RateLimitConfig, RetryConfig,
};
pub use credential::Credential;
pub use frontier::{CrawlCheckpoint, FrontierEntry};
pub use ranking::{HiddenInfluencerResult, InfluencerCategories, PageRankResult, Ranking};
pub use user::{Edge, User};

/// One page of accounts returned by a paginated endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPage {
    pub users: Vec<User>,
    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}
