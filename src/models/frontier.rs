// src/models/frontier.rs

//! Crawl frontier entries and checkpoints.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node waiting to be expanded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub user_id: String,
    pub depth: u32,
}

impl FrontierEntry {
    pub fn new(user_id: impl Into<String>, depth: u32) -> Self {
        Self {
            user_id: user_id.into(),
            depth,
        }
    }
}

/// Resumable snapshot of a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Seeds the run was started with
    pub seeds: Vec<String>,
    pub max_depth: u32,
    pub max_per_level: usize,
    /// Entries not yet expanded, including those in flight at save time
    pub pending: Vec<FrontierEntry>,
    /// Expanded ids, sorted
    pub visited: Vec<String>,
    /// Ids whose expansion failed, sorted
    pub failed: Vec<String>,
    pub processed: usize,
    pub saved_at: DateTime<Utc>,
}

impl CrawlCheckpoint {
    /// Whether a crawl asked to start from `seeds` should continue this one
    /// instead: work is pending and `seeds` is empty or names the same set.
    pub fn continues(&self, seeds: &[String]) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        if seeds.is_empty() {
            return true;
        }
        let requested: BTreeSet<&str> = seeds.iter().map(String::as_str).collect();
        let stored: BTreeSet<&str> = self.seeds.iter().map(String::as_str).collect();
        requested == stored
    }
}
