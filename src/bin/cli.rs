//! xspider CLI
//!
//! Local execution entry point: seed discovery, crawling and ranking over a
//! storage directory holding `config.toml` and the collected graph.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use xspider::{
    error::{AppError, Result},
    graph::GraphBuilder,
    models::{Config, HiddenInfluencerResult},
    pipeline::{
        self, Crawler, ExportFormat, ProgressEvent, ProgressSink, SeedCollector, StopHandle,
    },
    services::{RequestOrchestrator, SocialApi},
    storage::{GraphStore, LocalStorage},
};

/// xspider - Follow-graph crawler and hidden influencer ranking
#[derive(Parser, Debug)]
#[command(
    name = "xspider",
    version,
    about = "Crawl follow graphs from seed accounts and rank hidden influencers"
)]
struct Cli {
    /// Path to storage directory containing config.toml and graph data
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover and store seed accounts
    Seed {
        #[command(subcommand)]
        source: SeedCommand,
    },

    /// Crawl the follow graph from stored (or given) seeds
    Crawl {
        /// Seed ids; defaults to every stored seed
        #[arg(long, value_delimiter = ',')]
        seeds: Vec<String>,

        /// Maximum BFS depth (default from config)
        #[arg(long)]
        depth: Option<u32>,

        /// Maximum followings fetched per node (default from config)
        #[arg(long)]
        max_per_level: Option<usize>,

        /// Ignore any stored checkpoint and start over
        #[arg(long)]
        fresh: bool,
    },

    /// Rank the stored graph
    Rank {
        /// Number of results to show (default from config)
        #[arg(long)]
        top: Option<usize>,
    },

    /// Write users, edges and rankings to files
    Export {
        /// Output directory
        #[arg(short, long, default_value = "exports")]
        output_dir: PathBuf,

        /// json or jsonl
        #[arg(short, long, default_value_t = ExportFormat::Jsonl)]
        format: ExportFormat,
    },

    /// Validate configuration file
    Validate,

    /// Show storage and graph info
    Info,
}

#[derive(Subcommand, Debug)]
enum SeedCommand {
    /// Search accounts by bio keywords
    Search {
        #[arg(long, value_delimiter = ',', required = true)]
        keywords: Vec<String>,

        #[arg(long, default_value_t = 50)]
        max_per_keyword: usize,
    },

    /// Collect members of curated lists
    List {
        #[arg(long, value_delimiter = ',', required = true)]
        lists: Vec<String>,

        #[arg(long, default_value_t = 200)]
        max_per_list: usize,
    },

    /// Run bio searches and list scraping together
    All {
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,

        #[arg(long, default_value_t = 50)]
        max_per_keyword: usize,

        #[arg(long, value_delimiter = ',')]
        lists: Vec<String>,

        #[arg(long, default_value_t = 200)]
        max_per_list: usize,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_api(config: &Config) -> Result<SocialApi> {
    if config.credentials.is_empty() {
        return Err(AppError::config("No credentials configured in config.toml"));
    }
    Ok(SocialApi::new(Arc::new(RequestOrchestrator::from_config(
        config,
    ))))
}

/// Log progress events until the sink is dropped.
fn spawn_progress_logger() -> ProgressSink {
    let (sink, mut rx) = ProgressSink::channel();
    tokio::spawn(async move {
        while let Some(ProgressEvent {
            source,
            query_or_list_id,
            users_found,
            total_so_far,
        }) = rx.recv().await
        {
            log::info!(
                "[{:?}] {}: {} found ({} total)",
                source,
                query_or_list_id,
                users_found,
                total_so_far
            );
        }
    });
    sink
}

fn log_results(title: &str, results: &[HiddenInfluencerResult]) {
    if results.is_empty() {
        return;
    }
    log::info!("{} ({})", title, results.len());
    for (rank, r) in results.iter().enumerate() {
        log::info!(
            "  {:>3}. {} (@{}) hidden={:.6} pagerank={:.6} followers={} seeds={}",
            rank + 1,
            r.user_id,
            r.handle,
            r.hidden_score,
            r.pagerank_score,
            r.followers_count,
            r.seed_followers_count
        );
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("xspider starting...");

    let config_path = cli.storage_dir.join("config.toml");
    let mut config = Config::load_or_default(&config_path);

    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let storage: Arc<dyn GraphStore> = Arc::new(LocalStorage::new(&cli.storage_dir));

    match cli.command {
        Command::Seed { source } => {
            config.validate()?;
            let api = build_api(&config)?;
            let collector =
                SeedCollector::new(Arc::new(api), &config).with_progress(spawn_progress_logger());

            let seeds = match source {
                SeedCommand::Search {
                    keywords,
                    max_per_keyword,
                } => collector.search_by_bio(&keywords, max_per_keyword).await?,
                SeedCommand::List {
                    lists,
                    max_per_list,
                } => collector.scrape_lists(&lists, max_per_list).await?,
                SeedCommand::All {
                    keywords,
                    max_per_keyword,
                    lists,
                    max_per_list,
                } => {
                    if keywords.is_empty() && lists.is_empty() {
                        return Err(AppError::config("Pass --keywords, --lists or both"));
                    }
                    collector
                        .collect_all(&keywords, max_per_keyword, &lists, max_per_list)
                        .await?
                }
            };
            collector.persist(storage.as_ref(), &seeds).await?;
            log::info!("Collected {} seeds", seeds.len());
        }

        Command::Crawl {
            seeds,
            depth,
            max_per_level,
            fresh,
        } => {
            if let Some(depth) = depth {
                config.crawler.max_depth = depth;
            }
            if let Some(max_per_level) = max_per_level {
                config.crawler.max_per_level = max_per_level;
            }
            config.validate()?;

            let api = build_api(&config)?;
            let stop = StopHandle::default();
            let signal_stop = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing in-flight requests...");
                    signal_stop.stop();
                }
            });

            let mut crawler = Crawler::new(Arc::new(api), Arc::clone(&storage), &config)
                .with_progress(spawn_progress_logger())
                .with_stop_handle(stop);

            if fresh {
                storage.clear_checkpoint().await?;
            }
            let resumable = storage
                .load_checkpoint()
                .await?
                .is_some_and(|checkpoint| checkpoint.continues(&seeds));

            let report = if resumable {
                crawler.resume().await?
            } else {
                let seeds = if seeds.is_empty() {
                    storage
                        .load_users()
                        .await?
                        .into_iter()
                        .filter(|user| user.is_seed)
                        .map(|user| user.id)
                        .collect()
                } else {
                    seeds
                };
                if seeds.is_empty() {
                    return Err(AppError::config(
                        "No seeds stored. Run 'seed' first or pass --seeds.",
                    ));
                }
                crawler
                    .start(
                        &seeds,
                        config.crawler.max_depth,
                        config.crawler.max_per_level,
                    )
                    .await?
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
            if let Some(reason) = &report.abort_reason {
                log::error!("Crawl aborted: {}", reason);
                return Err(AppError::crawl("crawl", reason));
            }
        }

        Command::Rank { top } => {
            if let Some(top) = top {
                config.analysis.top_k = top;
            }
            config.validate()?;

            let outcome = pipeline::run_ranking(Arc::clone(&storage), &config).await?;
            log::info!(
                "Graph: {} nodes, {} edges, density {:.6}",
                outcome.stats.node_count,
                outcome.stats.edge_count,
                outcome.stats.density
            );
            for (rank, r) in outcome.top_pagerank.iter().enumerate() {
                log::debug!(
                    "  {:>3}. {} pagerank(normalised)={:.4} in={} out={}",
                    rank + 1,
                    r.user_id,
                    r.score,
                    r.in_degree,
                    r.out_degree
                );
            }
            log_results("Top hidden influencers", &outcome.top_hidden);
            log_results("Followed by multiple seeds", &outcome.seed_consensus);
            log_results("Hidden gems", &outcome.categories.hidden_gems);
            log_results("Rising stars", &outcome.categories.rising_stars);
            log::info!(
                "Categories: {} hidden gems, {} established, {} rising stars, {} potential",
                outcome.categories.hidden_gems.len(),
                outcome.categories.established.len(),
                outcome.categories.rising_stars.len(),
                outcome.categories.potential.len()
            );
        }

        Command::Export { output_dir, format } => {
            let summary = pipeline::export_graph(storage.as_ref(), &output_dir, format).await?;
            for file in &summary.files {
                log::info!("  {}", file.display());
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
            log::info!(
                "  {} credentials, {} proxies",
                config.credentials.len(),
                config.proxies.len()
            );
            for proxy in &config.proxies {
                log::info!("  proxy {}", xspider::utils::mask_url(proxy));
            }

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let graph = GraphBuilder::new(Arc::clone(&storage)).build().await?;
            let seeds = graph.nodes().iter().filter(|node| node.is_seed).count();
            let stats = graph.stats();
            log::info!(
                "Graph: {} nodes ({} seeds), {} edges",
                stats.node_count,
                seeds,
                stats.edge_count
            );
            log::info!(
                "Degrees: avg in {:.2}, avg out {:.2}, max in {}, max out {}",
                stats.avg_in_degree,
                stats.avg_out_degree,
                stats.max_in_degree,
                stats.max_out_degree
            );

            match storage.load_checkpoint().await? {
                Some(checkpoint) => log::info!(
                    "Checkpoint: {} pending, {} visited, {} failed (saved {})",
                    checkpoint.pending.len(),
                    checkpoint.visited.len(),
                    checkpoint.failed.len(),
                    checkpoint.saved_at
                ),
                None => log::info!("No checkpoint found."),
            }

            let rankings = storage.load_rankings().await?;
            match rankings.first() {
                Some(top) => log::info!(
                    "Rankings: {} (last run {}, top {})",
                    rankings.len(),
                    top.ranked_at,
                    top.user_id()
                ),
                None => log::info!("No rankings yet."),
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
