// src/pipeline/rank.rs

//! Graph ranking pipeline: build, PageRank, hidden-influencer analysis.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::graph::{GraphBuilder, GraphStats, HiddenInfluencerAnalyzer, PageRankCalculator};
use crate::models::{
    Config, HiddenInfluencerResult, InfluencerCategories, PageRankResult, Ranking,
};
use crate::storage::GraphStore;

/// Everything a ranking run produces.
#[derive(Debug, Clone, Default)]
pub struct RankingOutcome {
    pub stats: GraphStats,
    /// Top nodes by PageRank, scores min-max normalised
    pub top_pagerank: Vec<PageRankResult>,
    /// Top nodes by hidden score after the configured filters
    pub top_hidden: Vec<HiddenInfluencerResult>,
    /// Nodes followed by at least two seeds
    pub seed_consensus: Vec<HiddenInfluencerResult>,
    pub categories: InfluencerCategories,
    /// Rankings persisted for every node
    pub ranked: usize,
}

/// Rank the stored graph and persist one ranking row per node.
pub async fn run_ranking(store: Arc<dyn GraphStore>, config: &Config) -> Result<RankingOutcome> {
    let graph = GraphBuilder::new(Arc::clone(&store)).build().await?;
    if graph.is_empty() {
        log::warn!("No users stored yet, nothing to rank");
        return Ok(RankingOutcome::default());
    }

    let pagerank = PageRankCalculator::new(&config.pagerank).compute(&graph)?;
    let results = HiddenInfluencerAnalyzer::new().analyze(&graph, &pagerank);

    let ranked_at = Utc::now();
    let rankings: Vec<Ranking> = results
        .iter()
        .cloned()
        .map(|result| Ranking::new(result, ranked_at))
        .collect();
    store.upsert_rankings(&rankings).await?;

    let analysis = &config.analysis;
    let outcome = RankingOutcome {
        stats: graph.stats(),
        top_pagerank: PageRankCalculator::top_k(
            &PageRankCalculator::normalize(&pagerank),
            analysis.top_k,
        ),
        top_hidden: HiddenInfluencerAnalyzer::top_hidden(
            &results,
            analysis.top_k,
            analysis.min_pagerank,
            analysis.max_followers,
        ),
        seed_consensus: HiddenInfluencerAnalyzer::by_seed_followers(&results, 2, analysis.top_k),
        categories: HiddenInfluencerAnalyzer::categorize(
            &results,
            analysis.hidden_percentile,
            analysis.pagerank_percentile,
        ),
        ranked: rankings.len(),
    };
    log::info!(
        "Ranked {} nodes; {} hidden gems",
        outcome.ranked,
        outcome.categories.hidden_gems.len()
    );
    Ok(outcome)
}
