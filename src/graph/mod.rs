// src/graph/mod.rs

//! Follow-graph materialisation and ranking.
//!
//! The graph is an arena: nodes live in a table ordered by id and edges are
//! adjacency lists of node indices. Rankings are computed per run and the
//! graph is discarded afterwards.

pub mod analysis;
pub mod builder;
pub mod pagerank;

pub use analysis::{HiddenInfluencerAnalyzer, hidden_score};
pub use builder::{FollowGraph, GraphBuilder, GraphNode, GraphStats};
pub use pagerank::PageRankCalculator;
