// src/pipeline/export.rs

//! Dump the stored graph and rankings to standalone files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::Result;
use crate::storage::GraphStore;

/// Output encoding for exported tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One pretty-printed array per file
    Json,
    /// One record per line
    #[default]
    Jsonl,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
        }
    }

    fn encode<T: Serialize>(self, records: &[T]) -> Result<Vec<u8>> {
        match self {
            Self::Json => Ok(serde_json::to_vec_pretty(records)?),
            Self::Jsonl => {
                let mut buffer = Vec::new();
                for record in records {
                    serde_json::to_writer(&mut buffer, record)?;
                    buffer.push(b'\n');
                }
                Ok(buffer)
            }
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(format!("unknown export format '{other}' (expected json or jsonl)")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Files written by [`export_graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub users: usize,
    pub edges: usize,
    pub rankings: usize,
    pub files: Vec<PathBuf>,
}

/// Write `users`, `edges` and `rankings` files into `out_dir`, replacing
/// earlier exports of the same format.
pub async fn export_graph(
    store: &dyn GraphStore,
    out_dir: &Path,
    format: ExportFormat,
) -> Result<ExportSummary> {
    tokio::fs::create_dir_all(out_dir).await?;

    let users = store.load_users().await?;
    let edges = store.load_edges().await?;
    let rankings = store.load_rankings().await?;

    let files = vec![
        write_table(out_dir, "users", format, &users).await?,
        write_table(out_dir, "edges", format, &edges).await?,
        write_table(out_dir, "rankings", format, &rankings).await?,
    ];
    log::info!(
        "Exported {} users, {} edges, {} rankings to {}",
        users.len(),
        edges.len(),
        rankings.len(),
        out_dir.display()
    );
    Ok(ExportSummary {
        users: users.len(),
        edges: edges.len(),
        rankings: rankings.len(),
        files,
    })
}

async fn write_table<T: Serialize>(
    out_dir: &Path,
    name: &str,
    format: ExportFormat,
    records: &[T],
) -> Result<PathBuf> {
    let path = out_dir.join(format!("{name}.{}", format.extension()));
    tokio::fs::write(&path, format.encode(records)?).await?;
    log::debug!("Wrote {} records to {}", records.len(), path.display());
    Ok(path)
}
