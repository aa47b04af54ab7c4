//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── users.jsonl           # One user record per line, later lines win
//! ├── edges.jsonl           # One edge per line
//! ├── rankings.json         # Latest ranking run
//! └── checkpoint.json       # Present while a crawl is resumable
//! ```
//!
//! User and edge files are append-only; only records that change are
//! written. The full graph is replayed into memory on first access.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{GraphStore, GraphTables};
use crate::error::{AppError, Result};
use crate::models::{CrawlCheckpoint, Edge, Ranking, User};

const USERS_KEY: &str = "users.jsonl";
const EDGES_KEY: &str = "edges.jsonl";
const RANKINGS_KEY: &str = "rankings.json";
const CHECKPOINT_KEY: &str = "checkpoint.json";

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    tables: Mutex<Option<GraphTables>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            tables: Mutex::new(None),
        }
    }

    pub fn root_dir(&self) -> &PathBuf {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Append records as JSON lines.
    async fn append_lines<T: Serialize>(&self, key: &str, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }
        self.append_bytes(key, &buffer).await
    }

    async fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read JSON lines. An unterminated last line is completed when it
    /// parses and cut from the file when it does not, so the next append
    /// starts on a line of its own.
    async fn read_lines<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(Vec::new());
        };
        let complete = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let (body, tail) = bytes.split_at(complete);

        let mut records = Vec::new();
        for (i, line) in String::from_utf8_lossy(body).lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line)
                .map_err(|e| AppError::storage(format!("{key} line {}: {e}", i + 1)))?;
            records.push(record);
        }

        if tail.iter().all(u8::is_ascii_whitespace) {
            return Ok(records);
        }
        match serde_json::from_slice(tail) {
            Ok(record) => {
                records.push(record);
                self.append_bytes(key, b"\n").await?;
            }
            Err(e) => {
                log::warn!("Dropping incomplete last line of {}: {}", key, e);
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(self.path(key))
                    .await?;
                file.set_len(complete as u64).await?;
            }
        }
        Ok(records)
    }

    /// Replay the user and edge logs into memory.
    async fn load_tables(&self) -> Result<GraphTables> {
        let mut tables = GraphTables::default();
        let users: Vec<User> = self.read_lines(USERS_KEY).await?;
        tables.merge_users(&users);
        let edges: Vec<Edge> = self.read_lines(EDGES_KEY).await?;
        tables.insert_edges(&edges);
        let rankings: Vec<Ranking> = self.read_json(RANKINGS_KEY).await?.unwrap_or_default();
        tables.upsert_rankings(&rankings);
        log::debug!(
            "Loaded {} users and {} edges from {:?}",
            tables.users.len(),
            tables.edges.len(),
            self.root_dir
        );
        Ok(tables)
    }

    /// Tables from the guarded slot, loading them on first use.
    async fn loaded<'a>(&self, slot: &'a mut Option<GraphTables>) -> Result<&'a mut GraphTables> {
        if slot.is_none() {
            *slot = Some(self.load_tables().await?);
        }
        Ok(slot.get_or_insert_with(GraphTables::default))
    }
}

#[async_trait]
impl GraphStore for LocalStorage {
    async fn upsert_users(&self, users: &[User]) -> Result<usize> {
        let mut guard = self.tables.lock().await;
        let (inserted, changed) = self.loaded(&mut guard).await?.stage_users(users);
        if let Err(e) = self.append_lines(USERS_KEY, &changed).await {
            // Replay on next access so a partial append is repaired.
            *guard = None;
            return Err(e);
        }
        self.loaded(&mut guard).await?.commit_users(&changed);
        Ok(inserted)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize> {
        let mut guard = self.tables.lock().await;
        let inserted = self.loaded(&mut guard).await?.stage_edges(edges);
        if let Err(e) = self.append_lines(EDGES_KEY, &inserted).await {
            *guard = None;
            return Err(e);
        }
        self.loaded(&mut guard).await?.edges.extend(inserted.iter().cloned());
        Ok(inserted.len())
    }

    async fn load_users(&self) -> Result<Vec<User>> {
        let mut guard = self.tables.lock().await;
        Ok(self.loaded(&mut guard).await?.sorted_users())
    }

    async fn load_edges(&self) -> Result<Vec<Edge>> {
        let mut guard = self.tables.lock().await;
        Ok(self.loaded(&mut guard).await?.edges.iter().cloned().collect())
    }

    async fn upsert_rankings(&self, rankings: &[Ranking]) -> Result<()> {
        let mut guard = self.tables.lock().await;
        let tables = self.loaded(&mut guard).await?;
        tables.upsert_rankings(rankings);
        let sorted = tables.sorted_rankings();
        self.write_json(RANKINGS_KEY, &sorted).await?;
        log::info!("Rankings: {} entries written to {}", sorted.len(), RANKINGS_KEY);
        Ok(())
    }

    async fn load_rankings(&self) -> Result<Vec<Ranking>> {
        let mut guard = self.tables.lock().await;
        Ok(self.loaded(&mut guard).await?.sorted_rankings())
    }

    async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
        self.write_json(CHECKPOINT_KEY, checkpoint).await
    }

    async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>> {
        self.read_json(CHECKPOINT_KEY).await
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        match tokio::fs::remove_file(self.path(CHECKPOINT_KEY)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
