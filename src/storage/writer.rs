//! Dedicated persistence task.
//!
//! Crawl workers never touch the store directly; they enqueue writes on an
//! unbounded channel consumed in order by a single task. The first failure
//! is recorded, raises a shared flag the crawler polls, and is returned from
//! [`PersistenceWriter::finish`]. Once a write has failed, later checkpoints
//! are dropped so the stored checkpoint never covers unwritten data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::GraphStore;
use crate::error::{AppError, Result};
use crate::models::{CrawlCheckpoint, Edge, User};

enum WriteCommand {
    Users(Vec<User>),
    Edges(Vec<Edge>),
    Checkpoint(Box<CrawlCheckpoint>),
    ClearCheckpoint,
    Flush(oneshot::Sender<()>),
}

/// Totals accumulated by the writer task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Users whose id was new to the store
    pub users_inserted: usize,
    /// Edges new to the store
    pub edges_inserted: usize,
    pub checkpoints_saved: usize,
    /// First write failure, if any
    pub error: Option<String>,
}

/// Handle to the persistence task.
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
    failed: Arc<AtomicBool>,
    task: JoinHandle<WriterReport>,
}

impl PersistenceWriter {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn GraphStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let failed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(store, rx, Arc::clone(&failed)));
        Self { tx, failed, task }
    }

    pub fn write_users(&self, users: Vec<User>) {
        if !users.is_empty() {
            self.send(WriteCommand::Users(users));
        }
    }

    pub fn write_edges(&self, edges: Vec<Edge>) {
        if !edges.is_empty() {
            self.send(WriteCommand::Edges(edges));
        }
    }

    pub fn save_checkpoint(&self, checkpoint: CrawlCheckpoint) {
        self.send(WriteCommand::Checkpoint(Box::new(checkpoint)));
    }

    pub fn clear_checkpoint(&self) {
        self.send(WriteCommand::ClearCheckpoint);
    }

    /// Whether any write has failed so far.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Wait until every write queued so far has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(WriteCommand::Flush(ack));
        done.await
            .map_err(|_| AppError::storage("persistence writer stopped"))?;
        if self.has_failed() {
            return Err(AppError::storage("a queued write failed"));
        }
        Ok(())
    }

    /// Drain the queue and stop the task. The report carries any write
    /// failure in `error`.
    pub async fn join(self) -> Result<WriterReport> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| AppError::storage(format!("persistence writer panicked: {e}")))
    }

    /// Like [`join`](Self::join), but a failed write becomes an error.
    pub async fn finish(self) -> Result<WriterReport> {
        let report = self.join().await?;
        match &report.error {
            Some(error) => Err(AppError::storage(error)),
            None => Ok(report),
        }
    }

    fn send(&self, command: WriteCommand) {
        if self.tx.send(command).is_err() {
            log::error!("Persistence writer is gone, dropping write");
            self.failed.store(true, Ordering::Release);
        }
    }
}

async fn run(
    store: Arc<dyn GraphStore>,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    failed: Arc<AtomicBool>,
) -> WriterReport {
    let mut report = WriterReport::default();
    while let Some(command) = rx.recv().await {
        let outcome = match command {
            WriteCommand::Users(users) => store
                .upsert_users(&users)
                .await
                .map(|n| report.users_inserted += n),
            WriteCommand::Edges(edges) => store
                .upsert_edges(&edges)
                .await
                .map(|n| report.edges_inserted += n),
            WriteCommand::Checkpoint(_) if report.error.is_some() => {
                log::warn!("Skipping checkpoint after failed write");
                Ok(())
            }
            WriteCommand::Checkpoint(checkpoint) => store
                .save_checkpoint(&checkpoint)
                .await
                .map(|()| report.checkpoints_saved += 1),
            WriteCommand::ClearCheckpoint => store.clear_checkpoint().await,
            WriteCommand::Flush(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        };
        if let Err(e) = outcome {
            log::error!("Persistence write failed: {}", e);
            failed.store(true, Ordering::Release);
            report.error.get_or_insert_with(|| e.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ranking;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    /// Store whose edge writes always fail.
    struct BrokenEdges(MemoryStorage);

    #[async_trait]
    impl GraphStore for BrokenEdges {
        async fn upsert_users(&self, users: &[User]) -> Result<usize> {
            self.0.upsert_users(users).await
        }
        async fn upsert_edges(&self, _edges: &[Edge]) -> Result<usize> {
            Err(AppError::storage("disk full"))
        }
        async fn load_users(&self) -> Result<Vec<User>> {
            self.0.load_users().await
        }
        async fn load_edges(&self) -> Result<Vec<Edge>> {
            self.0.load_edges().await
        }
        async fn upsert_rankings(&self, rankings: &[Ranking]) -> Result<()> {
            self.0.upsert_rankings(rankings).await
        }
        async fn load_rankings(&self) -> Result<Vec<Ranking>> {
            self.0.load_rankings().await
        }
        async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
            self.0.save_checkpoint(checkpoint).await
        }
        async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>> {
            self.0.load_checkpoint().await
        }
        async fn clear_checkpoint(&self) -> Result<()> {
            self.0.clear_checkpoint().await
        }
    }

    #[tokio::test]
    async fn test_writes_applied_in_order() {
        let store = Arc::new(MemoryStorage::new());
        let writer = PersistenceWriter::spawn(store.clone());

        writer.write_users(vec![User::bare("1"), User::bare("2")]);
        writer.write_edges(vec![Edge::new("1", "2")]);
        writer.write_edges(vec![Edge::new("1", "2")]);
        writer.flush().await.unwrap();
        assert_eq!(store.load_edges().await.unwrap().len(), 1);

        let report = writer.finish().await.unwrap();
        assert_eq!(report.users_inserted, 2);
        assert_eq!(report.edges_inserted, 1);
    }

    #[tokio::test]
    async fn test_failure_is_surfaced() {
        let store = Arc::new(BrokenEdges(MemoryStorage::new()));
        let writer = PersistenceWriter::spawn(store.clone());

        writer.write_users(vec![User::bare("1")]);
        writer.write_edges(vec![Edge::new("1", "2")]);
        assert!(writer.flush().await.is_err());
        assert!(writer.has_failed());

        let err = writer.finish().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.load_users().await.unwrap().len(), 1);
    }

    fn checkpoint(visited: &[&str]) -> CrawlCheckpoint {
        CrawlCheckpoint {
            seeds: vec!["1".to_string()],
            max_depth: 2,
            max_per_level: 10,
            pending: Vec::new(),
            visited: visited.iter().map(|id| id.to_string()).collect(),
            failed: Vec::new(),
            processed: visited.len(),
            saved_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_dropped_after_failed_write() {
        let store = Arc::new(BrokenEdges(MemoryStorage::new()));
        let writer = PersistenceWriter::spawn(store.clone());

        writer.save_checkpoint(checkpoint(&[]));
        writer.write_edges(vec![Edge::new("1", "2")]);
        writer.save_checkpoint(checkpoint(&["1"]));

        let report = writer.join().await.unwrap();
        assert!(report.error.is_some());
        assert_eq!(report.checkpoints_saved, 1);
        let stored = store.load_checkpoint().await.unwrap().unwrap();
        assert!(stored.visited.is_empty());
    }
}
