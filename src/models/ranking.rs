// src/models/ranking.rs

//! Ranking outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PageRank score of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRankResult {
    pub user_id: String,
    pub score: f64,
    pub in_degree: usize,
    pub out_degree: usize,
}

/// Influence of a node relative to its public audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenInfluencerResult {
    pub user_id: String,
    pub handle: String,
    pub pagerank_score: f64,
    pub followers_count: u64,
    /// `pagerank_score / ln(followers_count + 2)`
    pub hidden_score: f64,
    pub in_degree: usize,
    pub out_degree: usize,
    /// Distinct seeds following this node
    pub seed_followers_count: usize,
}

/// Persisted ranking row, one per user per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    #[serde(flatten)]
    pub result: HiddenInfluencerResult,
    pub ranked_at: DateTime<Utc>,
}

impl Ranking {
    pub fn new(result: HiddenInfluencerResult, ranked_at: DateTime<Utc>) -> Self {
        Self { result, ranked_at }
    }

    pub fn user_id(&self) -> &str {
        &self.result.user_id
    }
}

/// Nodes grouped by how their influence compares to their audience.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluencerCategories {
    /// High hidden score, below-median follower count
    pub hidden_gems: Vec<HiddenInfluencerResult>,
    /// High PageRank, at or above median follower count
    pub established: Vec<HiddenInfluencerResult>,
    /// High PageRank, not established
    pub rising_stars: Vec<HiddenInfluencerResult>,
    /// Hidden score at least half the high threshold
    pub potential: Vec<HiddenInfluencerResult>,
}
