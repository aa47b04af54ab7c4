// src/graph/analysis.rs

//! Hidden-influencer scoring: influence relative to public audience size.

use std::cmp::Ordering;

use super::builder::FollowGraph;
use crate::models::{HiddenInfluencerResult, InfluencerCategories, PageRankResult};

/// `pagerank / ln(followers + 2)`; finite for every follower count.
pub fn hidden_score(pagerank: f64, followers_count: u64) -> f64 {
    pagerank / (followers_count as f64 + 2.0).ln()
}

fn by_hidden_desc(a: &HiddenInfluencerResult, b: &HiddenInfluencerResult) -> Ordering {
    b.hidden_score
        .total_cmp(&a.hidden_score)
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Threshold at `percentile` of the sorted values, clamped to the last element.
fn percentile_threshold(mut values: Vec<f64>, percentile: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let idx = (values.len() as f64 * percentile / 100.0) as usize;
    values[idx.min(values.len() - 1)]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenInfluencerAnalyzer;

impl HiddenInfluencerAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Combine PageRank scores with node attributes and seed-follower counts.
    ///
    /// Results whose id is not in the graph are skipped.
    pub fn analyze(
        &self,
        graph: &FollowGraph,
        pagerank: &[PageRankResult],
    ) -> Vec<HiddenInfluencerResult> {
        if graph.is_empty() {
            log::warn!("Empty graph provided for hidden influencer analysis");
            return Vec::new();
        }

        let results: Vec<HiddenInfluencerResult> = pagerank
            .iter()
            .filter_map(|pr| {
                let index = graph.index_of(&pr.user_id)?;
                let node = graph.node(index);
                // Predecessor lists are deduplicated, so this counts distinct seeds.
                let seed_followers_count = graph
                    .predecessors(index)
                    .iter()
                    .filter(|&&p| graph.node(p).is_seed)
                    .count();
                Some(HiddenInfluencerResult {
                    user_id: node.id.clone(),
                    handle: node.handle.clone(),
                    pagerank_score: pr.score,
                    followers_count: node.followers_count,
                    hidden_score: hidden_score(pr.score, node.followers_count),
                    in_degree: pr.in_degree,
                    out_degree: pr.out_degree,
                    seed_followers_count,
                })
            })
            .collect();

        log::info!("Analyzed {} nodes for hidden influencers", results.len());
        results
    }

    /// Top `k` by hidden score after filtering on PageRank and follower count.
    pub fn top_hidden(
        results: &[HiddenInfluencerResult],
        k: usize,
        min_pagerank: f64,
        max_followers: Option<u64>,
    ) -> Vec<HiddenInfluencerResult> {
        let mut filtered: Vec<HiddenInfluencerResult> = results
            .iter()
            .filter(|r| r.pagerank_score >= min_pagerank)
            .filter(|r| max_followers.is_none_or(|max| r.followers_count <= max))
            .cloned()
            .collect();
        filtered.sort_by(by_hidden_desc);
        filtered.truncate(k);
        filtered
    }

    /// Top `k` by seed-follower count, ties broken by hidden score.
    pub fn by_seed_followers(
        results: &[HiddenInfluencerResult],
        min_seed_followers: usize,
        k: usize,
    ) -> Vec<HiddenInfluencerResult> {
        let mut filtered: Vec<HiddenInfluencerResult> = results
            .iter()
            .filter(|r| r.seed_followers_count >= min_seed_followers)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| {
            b.seed_followers_count
                .cmp(&a.seed_followers_count)
                .then_with(|| by_hidden_desc(a, b))
        });
        filtered.truncate(k);
        filtered
    }

    /// Partition into categories by percentile thresholds and the median
    /// follower count. A node lands in the first category it qualifies for.
    pub fn categorize(
        results: &[HiddenInfluencerResult],
        hidden_percentile: f64,
        pagerank_percentile: f64,
    ) -> InfluencerCategories {
        let mut categories = InfluencerCategories::default();
        if results.is_empty() {
            return categories;
        }

        let hidden_threshold = percentile_threshold(
            results.iter().map(|r| r.hidden_score).collect(),
            hidden_percentile,
        );
        let pagerank_threshold = percentile_threshold(
            results.iter().map(|r| r.pagerank_score).collect(),
            pagerank_percentile,
        );
        let mut followers: Vec<u64> = results.iter().map(|r| r.followers_count).collect();
        followers.sort_unstable();
        let median_followers = followers[followers.len() / 2];

        for result in results {
            let bucket = if result.hidden_score >= hidden_threshold
                && result.followers_count < median_followers
            {
                &mut categories.hidden_gems
            } else if result.pagerank_score >= pagerank_threshold
                && result.followers_count >= median_followers
            {
                &mut categories.established
            } else if result.pagerank_score >= pagerank_threshold {
                &mut categories.rising_stars
            } else if result.hidden_score >= hidden_threshold * 0.5 {
                &mut categories.potential
            } else {
                continue;
            };
            bucket.push(result.clone());
        }

        for bucket in [
            &mut categories.hidden_gems,
            &mut categories.established,
            &mut categories.rising_stars,
            &mut categories.potential,
        ] {
            bucket.sort_by(by_hidden_desc);
        }
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PageRankCalculator;
    use crate::models::{Edge, User};

    fn result(id: &str, pagerank: f64, followers: u64, seeds: usize) -> HiddenInfluencerResult {
        HiddenInfluencerResult {
            user_id: id.to_string(),
            handle: id.to_string(),
            pagerank_score: pagerank,
            followers_count: followers,
            hidden_score: hidden_score(pagerank, followers),
            in_degree: 0,
            out_degree: 0,
            seed_followers_count: seeds,
        }
    }

    #[test]
    fn test_hidden_score_decreases_with_followers() {
        let zero = hidden_score(0.1, 0);
        assert!(zero.is_finite());
        assert!((zero - 0.1 / 2f64.ln()).abs() < 1e-12);
        assert!(hidden_score(0.1, 10) < zero);
        assert!(hidden_score(0.1, 1_000_000) < hidden_score(0.1, 10));
    }

    #[test]
    fn test_analyze_counts_distinct_seed_followers() {
        let mut s1 = User::bare("s1").as_seed();
        s1.followers_count = 5;
        let s2 = User::bare("s2").as_seed();
        let mut c = User::bare("c");
        c.handle = "carol".into();
        c.followers_count = 40;
        let edges = vec![
            Edge::new("s1", "c"),
            Edge::new("s1", "c"),
            Edge::new("s2", "c"),
            Edge::new("x", "c"),
            Edge::new("s1", "x"),
        ];
        let graph = FollowGraph::from_parts(&[s1, s2, c], &edges);
        let pagerank = PageRankCalculator::default().compute(&graph).unwrap();

        let results = HiddenInfluencerAnalyzer::new().analyze(&graph, &pagerank);
        assert_eq!(results.len(), 4);

        let carol = results.iter().find(|r| r.user_id == "c").unwrap();
        assert_eq!(carol.handle, "carol");
        assert_eq!(carol.seed_followers_count, 2);
        assert_eq!(carol.in_degree, 3);
        assert_eq!(carol.hidden_score, hidden_score(carol.pagerank_score, 40));

        let x = results.iter().find(|r| r.user_id == "x").unwrap();
        assert_eq!(x.seed_followers_count, 1);
    }

    #[test]
    fn test_analyze_empty_graph() {
        let results = HiddenInfluencerAnalyzer::new().analyze(&FollowGraph::default(), &[]);
        assert!(results.is_empty());
    }

    #[test]
    fn test_top_hidden_filters() {
        let results = vec![
            result("big", 0.5, 1_000_000, 0),
            result("small", 0.2, 10, 0),
            result("tiny", 0.01, 0, 0),
        ];

        let top = HiddenInfluencerAnalyzer::top_hidden(&results, 10, 0.0, None);
        assert_eq!(top[0].user_id, "small");

        let top = HiddenInfluencerAnalyzer::top_hidden(&results, 10, 0.1, Some(100));
        let ids: Vec<_> = top.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, vec!["small"]);

        assert_eq!(HiddenInfluencerAnalyzer::top_hidden(&results, 2, 0.0, None).len(), 2);
    }

    #[test]
    fn test_by_seed_followers_breaks_ties_on_hidden_score() {
        let results = vec![
            result("a", 0.1, 1000, 2),
            result("b", 0.1, 10, 2),
            result("c", 0.3, 10, 3),
            result("d", 0.9, 10, 0),
        ];
        let ranked = HiddenInfluencerAnalyzer::by_seed_followers(&results, 1, 10);
        let ids: Vec<_> = ranked.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_categorize() {
        let results = vec![
            result("gem", 0.30, 5, 0),
            result("star", 0.40, 50_000, 0),
            result("mid", 0.05, 100, 0),
            result("low", 0.01, 200, 0),
            result("noise", 0.001, 300, 0),
        ];
        // Median followers is 200; both thresholds sit at the max value.
        let categories = HiddenInfluencerAnalyzer::categorize(&results, 90.0, 90.0);

        let ids = |v: &[HiddenInfluencerResult]| -> Vec<String> {
            v.iter().map(|r| r.user_id.clone()).collect()
        };
        assert_eq!(ids(&categories.hidden_gems), vec!["gem"]);
        assert_eq!(ids(&categories.established), vec!["star"]);
        assert!(categories.rising_stars.is_empty());
        assert!(categories.potential.is_empty());

        let categories = HiddenInfluencerAnalyzer::categorize(&results, 0.0, 100.0);
        assert_eq!(ids(&categories.hidden_gems), vec!["gem", "mid"]);
        assert_eq!(ids(&categories.established), vec!["star"]);
        assert_eq!(ids(&categories.potential), vec!["low", "noise"]);
    }

    #[test]
    fn test_categorize_empty() {
        assert_eq!(
            HiddenInfluencerAnalyzer::categorize(&[], 90.0, 90.0),
            InfluencerCategories::default()
        );
    }
}
