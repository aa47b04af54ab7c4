// src/pipeline/crawl.rs

//! Breadth-first follow-graph crawl with bounded concurrency and checkpoints.
//!
//! A single owner drives the loop: it pops the frontier, keeps up to
//! `max_concurrent` expansions in flight, and applies each outcome in
//! completion order. Writes go through a [`PersistenceWriter`], so a
//! checkpoint queued after a batch of writes is only applied after them.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use super::progress::{ProgressEvent, ProgressSink, ProgressSource};
use super::retry::RetryPolicy;
use crate::error::{AppError, Disposition, RequestError, Result};
use crate::models::{Config, CrawlCheckpoint, Edge, FrontierEntry, User};
use crate::services::FollowingSource;
use crate::storage::{GraphStore, PersistenceWriter};

/// Lifecycle of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Idle,
    Running,
    /// Stopped on request; resumable from the checkpoint
    Paused,
    Completed,
    /// Aborted by a pool-wide or persistence failure
    Failed,
}

/// Outcome of a crawl run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlReport {
    pub state: CrawlState,
    /// Nodes expanded successfully
    pub processed: usize,
    /// Nodes whose retries were exhausted
    pub failed: usize,
    /// Nodes skipped because the target was unavailable
    pub skipped: usize,
    /// Edges new to the store
    pub edges: usize,
    /// Users new to the store
    pub users: usize,
    pub abort_reason: Option<String>,
    pub failed_nodes: Vec<String>,
}

/// Requests a running crawl to stop issuing new fetches.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct CrawlOptions {
    max_concurrent: usize,
    page_size: usize,
    checkpoint_every: usize,
    request_delay: Duration,
}

/// BFS queue plus the bookkeeping a checkpoint needs.
#[derive(Debug)]
struct Frontier {
    seeds: Vec<String>,
    max_depth: u32,
    max_per_level: usize,
    queue: VecDeque<FrontierEntry>,
    in_flight: Vec<FrontierEntry>,
    visited: BTreeSet<String>,
    failed: BTreeSet<String>,
    /// Every id ever queued, in flight, visited or failed
    known: HashSet<String>,
    processed: usize,
}

impl Frontier {
    fn new(seeds: &[String], max_depth: u32, max_per_level: usize) -> Self {
        let mut frontier = Self {
            seeds: Vec::new(),
            max_depth,
            max_per_level,
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            visited: BTreeSet::new(),
            failed: BTreeSet::new(),
            known: HashSet::new(),
            processed: 0,
        };
        for seed in seeds {
            if frontier.push(FrontierEntry::new(seed.as_str(), 0)) {
                frontier.seeds.push(seed.clone());
            }
        }
        frontier
    }

    fn from_checkpoint(checkpoint: CrawlCheckpoint) -> Self {
        let visited: BTreeSet<String> = checkpoint.visited.into_iter().collect();
        let failed: BTreeSet<String> = checkpoint.failed.into_iter().collect();
        let mut known: HashSet<String> = visited.iter().chain(failed.iter()).cloned().collect();
        let queue: VecDeque<FrontierEntry> = checkpoint
            .pending
            .into_iter()
            .filter(|entry| known.insert(entry.user_id.clone()))
            .collect();

        Self {
            seeds: checkpoint.seeds,
            max_depth: checkpoint.max_depth,
            max_per_level: checkpoint.max_per_level,
            queue,
            in_flight: Vec::new(),
            visited,
            failed,
            known,
            processed: checkpoint.processed,
        }
    }

    /// Queue an entry unless its id has been seen. Returns whether it was queued.
    fn push(&mut self, entry: FrontierEntry) -> bool {
        if !self.known.insert(entry.user_id.clone()) {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    fn pop(&mut self) -> Option<FrontierEntry> {
        let entry = self.queue.pop_front()?;
        self.in_flight.push(entry.clone());
        Some(entry)
    }

    fn settle(&mut self, entry: &FrontierEntry) {
        self.in_flight.retain(|e| e != entry);
    }

    /// Return an in-flight entry to the head of the queue.
    fn requeue(&mut self, entry: FrontierEntry) {
        self.settle(&entry);
        self.queue.push_front(entry);
    }

    fn is_exhausted(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    fn checkpoint(&self) -> CrawlCheckpoint {
        CrawlCheckpoint {
            seeds: self.seeds.clone(),
            max_depth: self.max_depth,
            max_per_level: self.max_per_level,
            pending: self.in_flight.iter().chain(&self.queue).cloned().collect(),
            visited: self.visited.iter().cloned().collect(),
            failed: self.failed.iter().cloned().collect(),
            processed: self.processed,
            saved_at: Utc::now(),
        }
    }
}

/// Profile and followings fetched for one node.
struct Expansion {
    profile: Option<User>,
    followings: Vec<User>,
}

struct NodeOutcome {
    entry: FrontierEntry,
    result: std::result::Result<Expansion, RequestError>,
}

/// Crawl driver. One run per [`start`](Self::start) or [`resume`](Self::resume).
pub struct Crawler {
    source: Arc<dyn FollowingSource>,
    store: Arc<dyn GraphStore>,
    options: CrawlOptions,
    retry: RetryPolicy,
    progress: ProgressSink,
    stop: StopHandle,
    state: CrawlState,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn FollowingSource>,
        store: Arc<dyn GraphStore>,
        config: &Config,
    ) -> Self {
        Self {
            source,
            store,
            options: CrawlOptions {
                max_concurrent: config.crawler.max_concurrent.max(1),
                page_size: config.crawler.page_size.max(1),
                checkpoint_every: config.crawler.checkpoint_every.max(1),
                request_delay: Duration::from_millis(config.crawler.request_delay_ms),
            },
            retry: RetryPolicy::from(&config.retry),
            progress: ProgressSink::disabled(),
            stop: StopHandle::default(),
            state: CrawlState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Share an existing stop handle, e.g. one wired to a signal handler.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Crawl from `seeds`, which are always expanded. Followings of a node
    /// at depth `d` are stored at depth `d + 1` and queued for expansion
    /// only when `d + 1 < max_depth`.
    pub async fn start(
        &mut self,
        seeds: &[String],
        max_depth: u32,
        max_per_level: usize,
    ) -> Result<CrawlReport> {
        if seeds.is_empty() {
            return Err(AppError::validation("No seeds to crawl from"));
        }
        log::info!(
            "Starting crawl from {} seeds (max depth {}, max {} per node)",
            seeds.len(),
            max_depth,
            max_per_level
        );
        let frontier = Frontier::new(seeds, max_depth, max_per_level);
        let placeholders: Vec<User> = frontier
            .seeds
            .iter()
            .map(|id| User::seed_placeholder(id.as_str()))
            .collect();
        self.run(frontier, placeholders).await
    }

    /// Continue from the stored checkpoint without revisiting expanded nodes.
    pub async fn resume(&mut self) -> Result<CrawlReport> {
        let checkpoint = self
            .store
            .load_checkpoint()
            .await?
            .ok_or_else(|| AppError::crawl("resume", "no checkpoint stored"))?;
        log::info!(
            "Resuming crawl: {} pending, {} visited, {} failed",
            checkpoint.pending.len(),
            checkpoint.visited.len(),
            checkpoint.failed.len()
        );
        self.run(Frontier::from_checkpoint(checkpoint), Vec::new())
            .await
    }

    async fn run(&mut self, mut frontier: Frontier, initial: Vec<User>) -> Result<CrawlReport> {
        self.state = CrawlState::Running;
        let writer = PersistenceWriter::spawn(Arc::clone(&self.store));
        writer.write_users(initial);

        let mut in_flight: FuturesUnordered<BoxFuture<'static, NodeOutcome>> =
            FuturesUnordered::new();
        let mut abort: Option<String> = None;
        let mut since_checkpoint = 0;
        let mut edges_seen = 0;
        let mut failed_count = 0;
        let mut skipped = 0;
        let processed_before = frontier.processed;

        loop {
            while abort.is_none()
                && !self.stop.is_stopped()
                && in_flight.len() < self.options.max_concurrent
            {
                let Some(entry) = frontier.pop() else { break };
                in_flight.push(self.expand(entry, frontier.max_per_level));
            }

            let Some(NodeOutcome { entry, result }) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(expansion) => {
                    let child_depth = entry.depth + 1;
                    let mut users: Vec<User> = expansion.profile.into_iter().collect();
                    let mut edges = Vec::with_capacity(expansion.followings.len());
                    for followed in expansion.followings {
                        edges.push(Edge::new(entry.user_id.as_str(), followed.id.as_str()));
                        if child_depth < frontier.max_depth {
                            frontier.push(FrontierEntry::new(followed.id.as_str(), child_depth));
                        }
                        users.push(followed.with_depth(child_depth));
                    }

                    edges_seen += edges.len();
                    self.progress.emit(ProgressEvent::new(
                        ProgressSource::Following,
                        entry.user_id.as_str(),
                        edges.len(),
                        edges_seen,
                    ));
                    log::debug!(
                        "Expanded {} at depth {}: {} followings",
                        entry.user_id,
                        entry.depth,
                        edges.len()
                    );
                    writer.write_users(users);
                    writer.write_edges(edges);

                    frontier.settle(&entry);
                    frontier.visited.insert(entry.user_id);
                    frontier.processed += 1;
                }
                Err(err) => match err.disposition() {
                    Disposition::Fatal => {
                        log::error!("Aborting crawl at {}: {}", entry.user_id, err);
                        abort.get_or_insert_with(|| err.to_string());
                        frontier.requeue(entry);
                        continue;
                    }
                    Disposition::SkipNode => {
                        log::info!("Skipping {}: {}", entry.user_id, err);
                        frontier.settle(&entry);
                        frontier.visited.insert(entry.user_id);
                        skipped += 1;
                    }
                    Disposition::Retry => {
                        log::warn!("Giving up on {}: {}", entry.user_id, err);
                        frontier.settle(&entry);
                        frontier.failed.insert(entry.user_id);
                        failed_count += 1;
                    }
                },
            }

            if writer.has_failed() && abort.is_none() {
                abort = Some("persistence write failed".to_string());
            }

            since_checkpoint += 1;
            if since_checkpoint >= self.options.checkpoint_every {
                writer.save_checkpoint(frontier.checkpoint());
                since_checkpoint = 0;
            }
        }

        let mut state = if abort.is_some() {
            CrawlState::Failed
        } else if frontier.is_exhausted() {
            CrawlState::Completed
        } else {
            CrawlState::Paused
        };
        writer.save_checkpoint(frontier.checkpoint());

        let written = match writer.join().await {
            Ok(written) => written,
            Err(e) => {
                self.state = CrawlState::Failed;
                return Err(e);
            }
        };
        if let Some(error) = written.error.as_ref().filter(|_| abort.is_none()) {
            abort = Some(format!("persistence write failed: {error}"));
            state = CrawlState::Failed;
        }
        self.state = state;

        let report = CrawlReport {
            state,
            processed: frontier.processed - processed_before,
            failed: failed_count,
            skipped,
            edges: written.edges_inserted,
            users: written.users_inserted,
            abort_reason: abort,
            failed_nodes: frontier.failed.iter().cloned().collect(),
        };
        log::info!(
            "Crawl {:?}: {} processed, {} failed, {} skipped, {} new edges, {} new users",
            report.state,
            report.processed,
            report.failed,
            report.skipped,
            report.edges,
            report.users
        );
        Ok(report)
    }

    fn expand(
        &self,
        entry: FrontierEntry,
        max_per_level: usize,
    ) -> BoxFuture<'static, NodeOutcome> {
        let source = Arc::clone(&self.source);
        let retry = self.retry;
        let options = self.options;
        async move {
            let result = fetch_node(source.as_ref(), retry, options, &entry, max_per_level).await;
            NodeOutcome { entry, result }
        }
        .boxed()
    }
}

async fn fetch_node(
    source: &dyn FollowingSource,
    retry: RetryPolicy,
    options: CrawlOptions,
    entry: &FrontierEntry,
    max_per_level: usize,
) -> std::result::Result<Expansion, RequestError> {
    let id = entry.user_id.as_str();

    let profile = if entry.depth == 0 {
        let lookup = retry
            .run(&format!("profile {id}"), || source.user_by_id(id))
            .await;
        match lookup {
            Ok(Some(user)) => Some(user.as_seed()),
            Ok(None) => Some(User::seed_placeholder(id)),
            Err(err) if err.disposition() == Disposition::Fatal => return Err(err),
            Err(err) => {
                log::warn!("Profile lookup for seed {} failed: {}", id, err);
                Some(User::seed_placeholder(id))
            }
        }
    } else {
        None
    };

    let mut followings: Vec<User> = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    let label = format!("following {id}");
    while followings.len() < max_per_level {
        let count = options.page_size.min(max_per_level - followings.len());
        let page = retry
            .run(&label, || source.following_page(id, count, cursor.as_deref()))
            .await?;
        let last =
            page.users.is_empty() || page.next_cursor.is_none() || page.next_cursor == cursor;
        followings.extend(
            page.users
                .into_iter()
                .filter(|user| user.id != id && seen.insert(user.id.clone())),
        );
        cursor = page.next_cursor;
        if last {
            break;
        }
        if !options.request_delay.is_zero() {
            tokio::time::sleep(options.request_delay).await;
        }
    }
    followings.truncate(max_per_level);

    Ok(Expansion {
        profile,
        followings,
    })
}
