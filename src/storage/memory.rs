//! In-memory storage backend.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{GraphStore, GraphTables};
use crate::error::Result;
use crate::models::{CrawlCheckpoint, Edge, Ranking, User};
use crate::utils::lock;

/// Volatile [`GraphStore`], used for tests and dry runs.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<GraphTables>,
    checkpoint: Mutex<Option<CrawlCheckpoint>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryStorage {
    async fn upsert_users(&self, users: &[User]) -> Result<usize> {
        Ok(lock(&self.tables).merge_users(users).0)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize> {
        Ok(lock(&self.tables).insert_edges(edges).len())
    }

    async fn load_users(&self) -> Result<Vec<User>> {
        Ok(lock(&self.tables).sorted_users())
    }

    async fn load_edges(&self) -> Result<Vec<Edge>> {
        Ok(lock(&self.tables).edges.iter().cloned().collect())
    }

    async fn upsert_rankings(&self, rankings: &[Ranking]) -> Result<()> {
        lock(&self.tables).upsert_rankings(rankings);
        Ok(())
    }

    async fn load_rankings(&self) -> Result<Vec<Ranking>> {
        Ok(lock(&self.tables).sorted_rankings())
    }

    async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
        *lock(&self.checkpoint) = Some(checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>> {
        Ok(lock(&self.checkpoint).clone())
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        *lock(&self.checkpoint) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_edges_ignored() {
        let store = MemoryStorage::new();
        let edges = vec![Edge::new("a", "b"), Edge::new("a", "c")];
        assert_eq!(store.upsert_edges(&edges).await.unwrap(), 2);
        assert_eq!(store.upsert_edges(&edges).await.unwrap(), 0);
        assert_eq!(
            store.upsert_edges(&[Edge::new("a", "b"), Edge::new("b", "c")]).await.unwrap(),
            1
        );
        assert_eq!(store.load_edges().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_user_merge_rules() {
        let store = MemoryStorage::new();
        let seed = User::bare("1").as_seed();
        assert_eq!(store.upsert_users(&[seed]).await.unwrap(), 1);

        let mut refreshed = User::bare("1").with_depth(2);
        refreshed.followers_count = 50;
        assert_eq!(store.upsert_users(&[refreshed]).await.unwrap(), 0);

        let users = store.load_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].is_seed);
        assert_eq!(users[0].depth, 0);
        assert_eq!(users[0].followers_count, 50);
    }
}
