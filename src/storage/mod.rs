//! Storage abstractions for crawl and ranking persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── users.jsonl           # Append-only user observations, merged on load
//! ├── edges.jsonl           # Append-only follow edges
//! ├── rankings.json         # Latest ranking per user
//! └── checkpoint.json       # Resumable crawl state
//! ```

pub mod local;
pub mod memory;
pub mod writer;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CrawlCheckpoint, Edge, Ranking, User};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use writer::{PersistenceWriter, WriterReport};

/// Persistence boundary for the follow graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge users into the store. Returns how many ids were new.
    async fn upsert_users(&self, users: &[User]) -> Result<usize>;

    /// Insert edges, ignoring duplicates. Returns how many were new.
    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize>;

    /// All users, sorted by id.
    async fn load_users(&self) -> Result<Vec<User>>;

    /// All edges, sorted.
    async fn load_edges(&self) -> Result<Vec<Edge>>;

    /// Replace rankings per user id.
    async fn upsert_rankings(&self, rankings: &[Ranking]) -> Result<()>;

    /// All rankings, highest hidden score first.
    async fn load_rankings(&self) -> Result<Vec<Ranking>>;

    async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()>;

    async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>>;

    async fn clear_checkpoint(&self) -> Result<()>;
}

/// In-memory graph shared by the storage backends.
#[derive(Debug, Default)]
struct GraphTables {
    users: HashMap<String, User>,
    edges: BTreeSet<Edge>,
    rankings: HashMap<String, Ranking>,
}

impl GraphTables {
    /// Merged records for `users` without applying them: the new-id count
    /// and the records that differ from what is stored.
    fn stage_users(&self, users: &[User]) -> (usize, Vec<User>) {
        let mut staged: Vec<User> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut inserted = 0;
        for user in users {
            if let Some(&i) = positions.get(user.id.as_str()) {
                staged[i].merge(user.clone());
                continue;
            }
            let merged = match self.users.get(&user.id) {
                Some(existing) => {
                    let mut merged = existing.clone();
                    merged.merge(user.clone());
                    if merged == *existing {
                        continue;
                    }
                    merged
                }
                None => {
                    inserted += 1;
                    user.clone()
                }
            };
            positions.insert(user.id.as_str(), staged.len());
            staged.push(merged);
        }
        (inserted, staged)
    }

    fn commit_users(&mut self, staged: &[User]) {
        for user in staged {
            self.users.insert(user.id.clone(), user.clone());
        }
    }

    /// Merge users; returns the new-id count and the records that changed.
    fn merge_users(&mut self, users: &[User]) -> (usize, Vec<User>) {
        let (inserted, changed) = self.stage_users(users);
        self.commit_users(&changed);
        (inserted, changed)
    }

    /// Edges not yet stored, deduplicated, in input order.
    fn stage_edges(&self, edges: &[Edge]) -> Vec<Edge> {
        let mut fresh = BTreeSet::new();
        edges
            .iter()
            .filter(|edge| !self.edges.contains(*edge) && fresh.insert(*edge))
            .cloned()
            .collect()
    }

    /// Insert edges; returns the ones not seen before.
    fn insert_edges(&mut self, edges: &[Edge]) -> Vec<Edge> {
        let inserted = self.stage_edges(edges);
        self.edges.extend(inserted.iter().cloned());
        inserted
    }

    fn sorted_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    fn upsert_rankings(&mut self, rankings: &[Ranking]) {
        for ranking in rankings {
            self.rankings
                .insert(ranking.user_id().to_string(), ranking.clone());
        }
    }

    fn sorted_rankings(&self) -> Vec<Ranking> {
        let mut rankings: Vec<Ranking> = self.rankings.values().cloned().collect();
        rankings.sort_by(|a, b| {
            b.result
                .hidden_score
                .total_cmp(&a.result.hidden_score)
                .then_with(|| a.user_id().cmp(b.user_id()))
        });
        rankings
    }
}
