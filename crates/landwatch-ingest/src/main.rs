//! LandWatch Ingest - versioned dataset ingestion job

use anyhow::Result;
use clap::{Parser, Subcommand};
use landwatch_common::logging::{init_logging, LogConfig, LogLevel};
use landwatch_ingest::catalog;
use landwatch_ingest::config::IngestConfig;
use landwatch_ingest::pipeline::IngestPipeline;
use landwatch_ingest::runner::{
    cleanup_category, DatasetSource, JobRunner, LocalDirSource, SourceFilters,
};
use landwatch_ingest::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Categories processed when none are requested explicitly.
const DEFAULT_CATEGORIES: &[&str] = &["PRODES", "DETER", "SICAR", "URL"];

#[derive(Parser, Debug)]
#[command(name = "landwatch-ingest")]
#[command(author, version, about = "Version-aware geospatial dataset ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full job for one or more categories
    Run {
        /// Category to run (repeatable); all categories when omitted
        #[arg(short, long)]
        category: Vec<String>,

        /// Snapshot date (YYYY-MM-DD); configured default when omitted
        #[arg(long)]
        snapshot_date: Option<String>,

        /// Comma-separated workspace filters (dataset-code prefixes)
        #[arg(long)]
        workspaces: Option<String>,

        /// Comma-separated year filters (dataset-code suffixes)
        #[arg(long)]
        years: Option<String>,
    },

    /// Ingest explicit files directly, bypassing sources and manifests
    IngestFiles {
        /// Comma-separated list of .shp/.csv paths
        #[arg(long)]
        files: String,

        /// Category the datasets are recorded under
        #[arg(long, default_value = "URL")]
        category: String,

        /// Snapshot date (YYYY-MM-DD); configured default when omitted
        #[arg(long)]
        snapshot_date: Option<String>,
    },

    /// Apply retention cleanup to stored manifests and raw trees
    Maintenance {
        /// Category to clean (repeatable); all categories when omitted
        #[arg(short, long)]
        category: Vec<String>,
    },
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn requested_categories(requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
    } else {
        requested.iter().map(|c| c.trim().to_uppercase()).collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("landwatch-ingest");
    if cli.verbose {
        log_config = log_config.with_level(LogLevel::Debug);
    }
    init_logging(&log_config)?;

    let config = IngestConfig::load()?;

    match cli.command {
        Command::Run {
            category,
            snapshot_date,
            workspaces,
            years,
        } => {
            let snapshot_date =
                snapshot_date.unwrap_or_else(|| config.default_snapshot_date.clone());
            let filters = SourceFilters {
                workspaces: split_csv(workspaces.as_deref()),
                years: split_csv(years.as_deref()),
            };

            let storage = Storage::new(&config.storage).await?;
            let pool = catalog::create_pool(&config.db).await?;
            let pipeline = Arc::new(IngestPipeline::new(pool, config.clone()));

            let sources: Vec<Box<dyn DatasetSource>> = requested_categories(&category)
                .into_iter()
                .map(|c| {
                    Box::new(LocalDirSource::new(c, filters.clone())) as Box<dyn DatasetSource>
                })
                .collect();

            let runner = JobRunner::new(config, storage, pipeline);
            let summary = runner.run_all(&sources, &snapshot_date).await?;

            let failed = summary
                .values()
                .filter(|r| r.status == landwatch_common::types::RunStatus::Failed)
                .count();
            if failed > 0 {
                anyhow::bail!("{failed} category(ies) failed");
            }
        },

        Command::IngestFiles {
            files,
            category,
            snapshot_date,
        } => {
            let snapshot_date =
                snapshot_date.unwrap_or_else(|| config.default_snapshot_date.clone());
            let category = category.trim().to_uppercase();
            let paths: Vec<PathBuf> = split_csv(Some(&files)).into_iter().map(PathBuf::from).collect();
            if paths.is_empty() {
                anyhow::bail!("No files given");
            }

            let pool = catalog::create_pool(&config.db).await?;
            let pipeline = IngestPipeline::new(pool, config);

            let mut failures = 0usize;
            for path in &paths {
                if let Err(e) = pipeline.ingest_file(&category, path, &snapshot_date).await {
                    error!(file = %path.display(), error = %format!("{e:#}"), "File failed");
                    failures += 1;
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} of {} file(s) failed", paths.len());
            }
            info!("All files ingested");
        },

        Command::Maintenance { category } => {
            let storage = Storage::new(&config.storage).await?;
            for category in requested_categories(&category) {
                cleanup_category(&storage, &category, config.retention_runs).await?;
            }
            info!("Maintenance complete");
        },
    }

    Ok(())
}
