//! Pipeline entry points.
//!
//! - `SeedCollector`: Discover seed accounts from bio searches and lists
//! - `Crawler`: Expand the follow graph breadth-first from the seeds
//! - `run_ranking`: Rank the stored graph and persist the results
//! - `export_graph`: Dump users, edges and rankings to files

pub mod crawl;
pub mod export;
pub mod progress;
pub mod rank;
pub mod retry;
pub mod seed;

pub use crawl::{CrawlReport, CrawlState, Crawler, StopHandle};
pub use export::{ExportFormat, ExportSummary, export_graph};
pub use progress::{ProgressEvent, ProgressSink, ProgressSource};
pub use rank::{RankingOutcome, run_ranking};
pub use retry::RetryPolicy;
pub use seed::SeedCollector;
