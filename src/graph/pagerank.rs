// src/graph/pagerank.rs

//! Power-iteration PageRank.

use super::builder::FollowGraph;
use crate::error::{AppError, Result};
use crate::models::{PageRankConfig, PageRankResult};

/// PageRank with uniform teleport and uniform redistribution of dangling mass.
#[derive(Debug, Clone, Copy)]
pub struct PageRankCalculator {
    damping: f64,
    max_iterations: usize,
    tolerance: f64,
}

impl Default for PageRankCalculator {
    fn default() -> Self {
        Self::new(&PageRankConfig::default())
    }
}

impl PageRankCalculator {
    pub fn new(config: &PageRankConfig) -> Self {
        Self {
            damping: config.damping,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// Scores for every node, in the graph's node order.
    ///
    /// Iteration stops once the L1 change between rounds drops below
    /// `node_count * tolerance`.
    pub fn compute(&self, graph: &FollowGraph) -> Result<Vec<PageRankResult>> {
        let n = graph.node_count();
        if n == 0 {
            log::warn!("Empty graph provided for PageRank computation");
            return Ok(Vec::new());
        }

        let uniform = 1.0 / n as f64;
        let dangling: Vec<usize> = (0..n).filter(|&i| graph.out_degree(i) == 0).collect();
        let mut scores = vec![uniform; n];

        for iteration in 1..=self.max_iterations {
            let previous = std::mem::replace(&mut scores, vec![0.0; n]);

            let dangling_mass: f64 = dangling.iter().map(|&i| previous[i]).sum();
            let base = (self.damping * dangling_mass + (1.0 - self.damping)) * uniform;

            for (source, &score) in previous.iter().enumerate() {
                let targets = graph.successors(source);
                if targets.is_empty() {
                    continue;
                }
                let share = self.damping * score / targets.len() as f64;
                for &target in targets {
                    scores[target] += share;
                }
            }
            for score in scores.iter_mut() {
                *score += base;
            }

            let delta: f64 = scores
                .iter()
                .zip(&previous)
                .map(|(now, before)| (now - before).abs())
                .sum();
            if delta < n as f64 * self.tolerance {
                log::info!(
                    "PageRank converged after {} iterations over {} nodes",
                    iteration,
                    n
                );
                return Ok(scores
                    .into_iter()
                    .enumerate()
                    .map(|(i, score)| PageRankResult {
                        user_id: graph.node(i).id.clone(),
                        score,
                        in_degree: graph.in_degree(i),
                        out_degree: graph.out_degree(i),
                    })
                    .collect());
            }
        }

        Err(AppError::graph(
            format!(
                "PageRank failed to converge after {} iterations",
                self.max_iterations
            ),
            n,
            graph.edge_count(),
        ))
    }

    /// The `k` highest scores, ties broken by id.
    pub fn top_k(results: &[PageRankResult], k: usize) -> Vec<PageRankResult> {
        let mut sorted = results.to_vec();
        sorted.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        sorted.truncate(k);
        sorted
    }

    /// Min-max scale scores into `[0, 1]`; all-equal scores become 1.0.
    pub fn normalize(results: &[PageRankResult]) -> Vec<PageRankResult> {
        let min = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
        let max = results
            .iter()
            .map(|r| r.score)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;

        results
            .iter()
            .map(|r| PageRankResult {
                score: if range > 0.0 { (r.score - min) / range } else { 1.0 },
                ..r.clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, User};

    fn graph(edges: &[(&str, &str)]) -> FollowGraph {
        let edges: Vec<Edge> = edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect();
        FollowGraph::from_parts(&[], &edges)
    }

    fn score_of(results: &[PageRankResult], id: &str) -> f64 {
        results.iter().find(|r| r.user_id == id).unwrap().score
    }

    #[test]
    fn test_empty_graph() {
        let results = PageRankCalculator::default()
            .compute(&FollowGraph::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_scores_sum_to_one() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("a", "d"), ("e", "d")]);
        let results = PageRankCalculator::default().compute(&g).unwrap();
        let total: f64 = results.iter().map(|r| r.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_ranks_most_followed_highest() {
        let g = graph(&[("A", "B"), ("A", "C"), ("B", "C")]);
        let results = PageRankCalculator::default().compute(&g).unwrap();

        let top = PageRankCalculator::top_k(&results, 1);
        assert_eq!(top[0].user_id, "C");
        assert_eq!(top[0].in_degree, 2);
        assert!(score_of(&results, "B") > score_of(&results, "A"));
    }

    #[test]
    fn test_invariant_to_insertion_order() {
        let forward = [("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")];
        let mut reversed = forward;
        reversed.reverse();
        let users_fwd = vec![User::bare("d"), User::bare("a")];
        let users_rev = vec![User::bare("a"), User::bare("d")];

        let edges = |pairs: &[(&str, &str)]| -> Vec<Edge> {
            pairs.iter().map(|(s, t)| Edge::new(*s, *t)).collect()
        };
        let g1 = FollowGraph::from_parts(&users_fwd, &edges(&forward));
        let g2 = FollowGraph::from_parts(&users_rev, &edges(&reversed));

        let calc = PageRankCalculator::default();
        assert_eq!(calc.compute(&g1).unwrap(), calc.compute(&g2).unwrap());
    }

    #[test]
    fn test_symmetric_cycle_is_uniform() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let results = PageRankCalculator::default().compute(&g).unwrap();
        for r in &results {
            assert!((r.score - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_non_convergence_reports_graph_size() {
        let g = graph(&[("a", "b"), ("a", "c"), ("b", "c")]);
        let calc = PageRankCalculator::new(&PageRankConfig {
            damping: 0.85,
            max_iterations: 1,
            tolerance: 1e-12,
        });
        match calc.compute(&g) {
            Err(AppError::Graph {
                node_count,
                edge_count,
                ..
            }) => {
                assert_eq!(node_count, 3);
                assert_eq!(edge_count, 3);
            }
            other => panic!("expected graph error, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize() {
        let g = graph(&[("A", "B"), ("A", "C"), ("B", "C")]);
        let results = PageRankCalculator::default().compute(&g).unwrap();
        let normalized = PageRankCalculator::normalize(&results);
        assert_eq!(score_of(&normalized, "C"), 1.0);
        assert_eq!(score_of(&normalized, "A"), 0.0);

        let flat = graph(&[("a", "b"), ("b", "a")]);
        let results = PageRankCalculator::default().compute(&flat).unwrap();
        assert!(PageRankCalculator::normalize(&results).iter().all(|r| r.score == 1.0));
    }
}
