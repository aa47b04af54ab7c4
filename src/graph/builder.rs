// src/graph/builder.rs

//! Arena-backed directed follow graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{Edge, User};
use crate::storage::GraphStore;

/// Per-node attributes the ranking needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub handle: String,
    pub followers_count: u64,
    pub following_count: u64,
    pub is_seed: bool,
    /// BFS depth at which the user was first reached
    pub depth: u32,
}

impl From<&User> for GraphNode {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            handle: user.handle.clone(),
            followers_count: user.followers_count,
            following_count: user.following_count,
            is_seed: user.is_seed,
            depth: user.depth,
        }
    }
}

/// Summary statistics of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub avg_in_degree: f64,
    pub avg_out_degree: f64,
    pub max_in_degree: usize,
    pub max_out_degree: usize,
}

/// Directed graph where an edge `u -> v` means `u` follows `v`.
#[derive(Debug, Clone, Default)]
pub struct FollowGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    edge_count: usize,
}

impl FollowGraph {
    /// Build from users and edges. Nodes are ordered by id; edge endpoints
    /// without a user record become bare nodes; duplicate edges collapse.
    pub fn from_parts(users: &[User], edges: &[Edge]) -> Self {
        let mut by_id: BTreeMap<&str, GraphNode> = users
            .iter()
            .map(|user| (user.id.as_str(), GraphNode::from(user)))
            .collect();
        for edge in edges {
            for id in [&edge.source_id, &edge.target_id] {
                by_id
                    .entry(id.as_str())
                    .or_insert_with(|| GraphNode::from(&User::bare(id.as_str())));
            }
        }

        let nodes: Vec<GraphNode> = by_id.into_values().collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        let pairs: BTreeSet<(usize, usize)> = edges
            .iter()
            .filter_map(|edge| {
                Some((*index.get(&edge.source_id)?, *index.get(&edge.target_id)?))
            })
            .collect();

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut predecessors = vec![Vec::new(); nodes.len()];
        for &(source, target) in &pairs {
            successors[source].push(target);
            predecessors[target].push(source);
        }

        Self {
            nodes,
            index,
            successors,
            predecessors,
            edge_count: pairs.len(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &GraphNode {
        &self.nodes[index]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Nodes `index` follows.
    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Nodes following `index`.
    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    pub fn in_degree(&self, index: usize) -> usize {
        self.predecessors[index].len()
    }

    pub fn out_degree(&self, index: usize) -> usize {
        self.successors[index].len()
    }

    pub fn stats(&self) -> GraphStats {
        let n = self.nodes.len();
        if n == 0 {
            return GraphStats::default();
        }
        let density = if n > 1 {
            self.edge_count as f64 / (n * (n - 1)) as f64
        } else {
            0.0
        };
        GraphStats {
            node_count: n,
            edge_count: self.edge_count,
            density,
            avg_in_degree: self.edge_count as f64 / n as f64,
            avg_out_degree: self.edge_count as f64 / n as f64,
            max_in_degree: self.predecessors.iter().map(Vec::len).max().unwrap_or(0),
            max_out_degree: self.successors.iter().map(Vec::len).max().unwrap_or(0),
        }
    }

    /// Graph induced by `ids`, optionally widened by their direct neighbours.
    pub fn subgraph(&self, ids: &[String], include_neighbors: bool) -> FollowGraph {
        let mut keep: HashSet<usize> = ids.iter().filter_map(|id| self.index_of(id)).collect();
        if include_neighbors {
            let centre: Vec<usize> = keep.iter().copied().collect();
            for i in centre {
                keep.extend(self.successors[i].iter().copied());
                keep.extend(self.predecessors[i].iter().copied());
            }
        }

        let users: Vec<User> = keep
            .iter()
            .map(|&i| {
                let node = &self.nodes[i];
                User {
                    handle: node.handle.clone(),
                    followers_count: node.followers_count,
                    following_count: node.following_count,
                    is_seed: node.is_seed,
                    depth: node.depth,
                    ..User::bare(node.id.as_str())
                }
            })
            .collect();
        let mut edges = Vec::new();
        for &source in &keep {
            for &target in &self.successors[source] {
                if keep.contains(&target) {
                    edges.push(Edge::new(
                        self.nodes[source].id.as_str(),
                        self.nodes[target].id.as_str(),
                    ));
                }
            }
        }
        FollowGraph::from_parts(&users, &edges)
    }
}

/// Loads the persisted graph.
pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn build(&self) -> Result<FollowGraph> {
        let users = self
            .store
            .load_users()
            .await
            .map_err(|e| AppError::graph(format!("failed to load users: {e}"), 0, 0))?;
        let edges = self
            .store
            .load_edges()
            .await
            .map_err(|e| AppError::graph(format!("failed to load edges: {e}"), users.len(), 0))?;

        let graph = FollowGraph::from_parts(&users, &edges);
        log::info!(
            "Built graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlCheckpoint, Ranking};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    fn scenario() -> FollowGraph {
        let users = vec![User::bare("A").as_seed(), User::bare("B"), User::bare("C")];
        let edges = vec![Edge::new("A", "B"), Edge::new("A", "C"), Edge::new("B", "C")];
        FollowGraph::from_parts(&users, &edges)
    }

    #[test]
    fn test_adjacency() {
        let graph = scenario();
        let a = graph.index_of("A").unwrap();
        let c = graph.index_of("C").unwrap();

        assert_eq!(graph.out_degree(a), 2);
        assert_eq!(graph.in_degree(c), 2);
        assert!(graph.node(a).is_seed);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_nodes_carry_profile_attributes() {
        let user = User {
            handle: "bob".to_string(),
            followers_count: 40,
            following_count: 12,
            ..User::bare("B").with_depth(2)
        };
        let graph = FollowGraph::from_parts(&[user], &[]);
        let node = graph.node(0);
        assert_eq!(node.handle, "bob");
        assert_eq!(node.followers_count, 40);
        assert_eq!(node.following_count, 12);
        assert_eq!(node.depth, 2);
        assert!(!node.is_seed);

        let copy = graph.subgraph(&["B".to_string()], false);
        assert_eq!(copy.node(0), node);
    }

    #[test]
    fn test_unknown_endpoints_become_bare_nodes() {
        let graph = FollowGraph::from_parts(&[User::bare("A")], &[Edge::new("A", "Z")]);
        assert_eq!(graph.node_count(), 2);
        let z = graph.index_of("Z").unwrap();
        assert_eq!(graph.node(z).followers_count, 0);
        assert!(!graph.node(z).is_seed);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let edges = vec![Edge::new("A", "B"), Edge::new("A", "B")];
        let graph = FollowGraph::from_parts(&[], &edges);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_nodes_ordered_by_id() {
        let users = vec![User::bare("b"), User::bare("c"), User::bare("a")];
        let graph = FollowGraph::from_parts(&users, &[]);
        let ids: Vec<&str> = graph.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stats() {
        let stats = scenario().stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 3);
        assert!((stats.density - 0.5).abs() < 1e-12);
        assert_eq!(stats.max_in_degree, 2);
        assert_eq!(stats.max_out_degree, 2);
        assert_eq!(FollowGraph::default().stats(), GraphStats::default());
    }

    #[test]
    fn test_subgraph() {
        let graph = scenario();
        let only_b = graph.subgraph(&["B".to_string()], false);
        assert_eq!(only_b.node_count(), 1);
        assert_eq!(only_b.edge_count(), 0);

        let around_b = graph.subgraph(&["B".to_string()], true);
        assert_eq!(around_b.node_count(), 3);
        assert_eq!(around_b.edge_count(), 3);
        assert!(around_b.node(around_b.index_of("A").unwrap()).is_seed);
    }

    #[tokio::test]
    async fn test_builder_loads_from_store() {
        let store = Arc::new(MemoryStorage::new());
        store.upsert_users(&[User::bare("A")]).await.unwrap();
        store.upsert_edges(&[Edge::new("A", "B")]).await.unwrap();

        let graph = GraphBuilder::new(store).build().await.unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    /// Store whose reads always fail.
    struct Unreadable;

    #[async_trait]
    impl GraphStore for Unreadable {
        async fn upsert_users(&self, _users: &[User]) -> Result<usize> {
            Ok(0)
        }
        async fn upsert_edges(&self, _edges: &[Edge]) -> Result<usize> {
            Ok(0)
        }
        async fn load_users(&self) -> Result<Vec<User>> {
            Err(AppError::storage("users.jsonl line 3: bad record"))
        }
        async fn load_edges(&self) -> Result<Vec<Edge>> {
            Ok(Vec::new())
        }
        async fn upsert_rankings(&self, _rankings: &[Ranking]) -> Result<()> {
            Ok(())
        }
        async fn load_rankings(&self) -> Result<Vec<Ranking>> {
            Ok(Vec::new())
        }
        async fn save_checkpoint(&self, _checkpoint: &CrawlCheckpoint) -> Result<()> {
            Ok(())
        }
        async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>> {
            Ok(None)
        }
        async fn clear_checkpoint(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_builder_storage_failure_is_graph_error() {
        let err = GraphBuilder::new(Arc::new(Unreadable)).build().await.unwrap_err();
        assert!(matches!(err, AppError::Graph { .. }));
        assert!(err.to_string().contains("failed to load users"));
    }
}
