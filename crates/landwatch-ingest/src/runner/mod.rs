//! Run orchestration
//!
//! A run walks every requested category: materialize artifacts (or reuse the
//! local leftovers of a failed run), detect changes against the previous
//! manifest, ingest only what changed, write the new manifest, and apply
//! retention. Categories are isolated; one failing category records `failed`
//! and the run moves on.

pub mod manifest;
pub mod retention;
pub mod sources;

pub use manifest::{
    build_manifest, load_latest_manifest, prev_fingerprint, save_manifest, DatasetEntry,
    RunManifest,
};
pub use retention::{cleanup_category, cleanup_files};
pub use sources::{scan_local_artifacts, DatasetSource, LocalDirSource, SourceFilters};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use landwatch_common::fingerprint::fingerprint_files;
use landwatch_common::types::{now_run_id, DatasetArtifact, RunStatus};

use crate::config::IngestConfig;
use crate::storage::Storage;

/// Ingests changed artifacts into the catalog.
#[async_trait]
pub trait ArtifactIngestor: Send + Sync {
    /// Returns whether every artifact ingested successfully.
    async fn ingest(&self, artifacts: &[DatasetArtifact], snapshot_date: &str) -> bool;
}

/// Outcome of one category in a run.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryResult {
    pub status: RunStatus,
    pub changed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub type RunSummary = BTreeMap<String, CategoryResult>;

pub struct JobRunner {
    config: IngestConfig,
    storage: Storage,
    ingestor: Arc<dyn ArtifactIngestor>,
}

impl JobRunner {
    pub fn new(config: IngestConfig, storage: Storage, ingestor: Arc<dyn ArtifactIngestor>) -> Self {
        Self {
            config,
            storage,
            ingestor,
        }
    }

    /// Run every source as one job run.
    pub async fn run_all(
        &self,
        sources: &[Box<dyn DatasetSource>],
        snapshot_date: &str,
    ) -> Result<RunSummary> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .context("Failed to create working directory")?;
        let run_id = now_run_id();
        info!(run_id, snapshot_date, "Starting run");

        let mut summary = RunSummary::new();
        for source in sources {
            let category = source.category().to_string();
            match self.run_category(source.as_ref(), &run_id, snapshot_date).await {
                Ok(result) => {
                    summary.insert(category, result);
                },
                Err(e) => {
                    warn!(
                        category,
                        error = %format!("{e:#}"),
                        "Category failed"
                    );
                    summary.insert(
                        category,
                        CategoryResult {
                            status: RunStatus::Failed,
                            changed: 0,
                            reason: Some(format!("{e:#}")),
                        },
                    );
                },
            }
        }

        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Run finished");
        Ok(summary)
    }

    async fn run_category(
        &self,
        source: &dyn DatasetSource,
        run_id: &str,
        snapshot_date: &str,
    ) -> Result<CategoryResult> {
        let category = source.category();

        // Leftover local files from a failed run are the same bytes that
        // failed to ingest; re-downloading them would be wasted work.
        let prev = load_latest_manifest(&self.storage, category).await?;
        let reuse = prev.map(|m| m.status == RunStatus::Failed).unwrap_or(false);

        let mut artifacts = Vec::new();
        if reuse {
            artifacts = source.filter(
                scan_local_artifacts(&self.config.work_dir, category, snapshot_date).await?,
            );
            if !artifacts.is_empty() {
                info!(
                    category,
                    artifacts = artifacts.len(),
                    "Reusing local artifacts from failed run"
                );
            }
        }
        if artifacts.is_empty() {
            artifacts = source.fetch(&self.config.work_dir, snapshot_date).await?;
        }

        self.process_category(run_id, category, artifacts).await
    }

    /// Change-detect, ingest, record and clean up one category.
    pub async fn process_category(
        &self,
        run_id: &str,
        category: &str,
        artifacts: Vec<DatasetArtifact>,
    ) -> Result<CategoryResult> {
        if artifacts.is_empty() {
            info!(category, "No artifacts, skipping category");
            return Ok(CategoryResult {
                status: RunStatus::Skipped,
                changed: 0,
                reason: Some("no_artifacts".to_string()),
            });
        }

        let prev = load_latest_manifest(&self.storage, category).await?;
        let mut changed: Vec<DatasetArtifact> = Vec::new();
        for artifact in &artifacts {
            let current = match fingerprint_files(&artifact.files) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warn!(
                        dataset = %artifact.dataset_code,
                        error = %e,
                        "Fingerprint failed, treating artifact as changed"
                    );
                    None
                },
            };
            let previous = prev_fingerprint(prev.as_ref(), &artifact.dataset_code);
            if previous.is_none() || current.as_deref() != previous {
                changed.push(artifact.clone());
            }
        }
        info!(
            category,
            artifacts = artifacts.len(),
            changed = changed.len(),
            "Change detection complete"
        );

        if self.config.save_raw {
            self.upload_artifacts(run_id, category, &artifacts).await?;
        }

        let mut status = RunStatus::Skipped;
        if !changed.is_empty() {
            let snapshot_date = artifacts[0].snapshot_date.clone();
            let ok = self.ingestor.ingest(&changed, &snapshot_date).await;
            status = if ok {
                RunStatus::Ingested
            } else {
                RunStatus::Failed
            };
        }

        let mut run_manifest = build_manifest(run_id, category, &artifacts);
        run_manifest.status = status;
        save_manifest(&self.storage, &run_manifest).await?;

        if status == RunStatus::Ingested {
            cleanup_category(&self.storage, category, self.config.retention_runs).await?;
        }
        if matches!(status, RunStatus::Ingested | RunStatus::Skipped) {
            cleanup_files(&artifacts).await;
        }

        Ok(CategoryResult {
            status,
            changed: changed.len(),
            reason: None,
        })
    }

    /// Copy raw artifact files into storage under this run's tree.
    async fn upload_artifacts(
        &self,
        run_id: &str,
        category: &str,
        artifacts: &[DatasetArtifact],
    ) -> Result<()> {
        let category_dir = self.config.work_dir.join(category);
        for artifact in artifacts {
            for file in &artifact.files {
                let rel = file
                    .strip_prefix(&category_dir)
                    .map(|r| r.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_else(|_| {
                        file.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    });
                let storage_path = format!("raw/{category}/{run_id}/{rel}");
                self.storage.upload_file(file, &storage_path).await?;
            }
        }
        Ok(())
    }
}
