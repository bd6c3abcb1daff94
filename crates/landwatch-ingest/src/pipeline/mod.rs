//! Per-file ingest driver
//!
//! Takes one primary source file (`.shp` or `.csv`) from fingerprint check to
//! a terminal catalog version status. Transient database failures retry the
//! whole attempt on a fresh connection with backoff; anything else records
//! FAILED with the error text and propagates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool};
use std::path::Path;
use tracing::{error, info, warn};

use landwatch_common::fingerprint::{fingerprint_source, is_shapefile};
use landwatch_common::types::{DatasetArtifact, VersionStatus};

use crate::bulk::GeometryLoader;
use crate::catalog::{
    finish_version, get_last_good_fingerprint, get_or_create_dataset, is_transient_anyhow,
    retry_delay, start_version,
};
use crate::config::IngestConfig;
use crate::runner::ArtifactIngestor;
use crate::staging;

/// Terminal outcome of one successfully processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested,
    /// Fingerprint matched the last good version; nothing was loaded.
    Skipped,
}

/// Dataset code derived from a file name: the stem, uppercased.
pub fn derive_dataset_code(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim().to_uppercase())
        .unwrap_or_default()
}

/// Whether a file is a primary ingest input rather than a sidecar.
pub fn is_primary_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("shp") | Some("csv")
    )
}

pub struct IngestPipeline {
    pool: PgPool,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(pool: PgPool, config: IngestConfig) -> Self {
        Self { pool, config }
    }

    /// Ingest one primary file end to end.
    ///
    /// Retries transient database failures up to the configured cap, then
    /// records FAILED on a fresh connection and returns the error.
    pub async fn ingest_file(
        &self,
        category_code: &str,
        file_path: &Path,
        snapshot_date: &str,
    ) -> Result<FileOutcome> {
        let dataset_code = derive_dataset_code(file_path);
        info!(
            file = %file_path.display(),
            category = category_code,
            dataset = %dataset_code,
            snapshot_date,
            "Processing file"
        );

        let mut version_id: Option<i64> = None;
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            match self
                .try_ingest(
                    category_code,
                    &dataset_code,
                    file_path,
                    snapshot_date,
                    &mut version_id,
                )
                .await
            {
                Ok(outcome) => break Ok(outcome),
                Err(e) if is_transient_anyhow(&e) && attempt <= self.config.retry.max_retries => {
                    let delay = retry_delay(attempt, &self.config.retry);
                    warn!(
                        attempt,
                        max_retries = self.config.retry.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        error = %format!("{e:#}"),
                        "Transient database failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    file = %file_path.display(),
                    error = %format!("{e:#}"),
                    "Ingestion failed"
                );
                if let Some(vid) = version_id {
                    self.record_failure(vid, &e).await;
                }
                Err(e)
            },
        }
    }

    async fn try_ingest(
        &self,
        category_code: &str,
        dataset_code: &str,
        file_path: &Path,
        snapshot_date: &str,
        version_id: &mut Option<i64>,
    ) -> Result<FileOutcome> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire database connection")?;

        let is_spatial = is_shapefile(file_path);
        let dataset_id =
            get_or_create_dataset(&mut conn, dataset_code, category_code, is_spatial).await?;

        let source_path = file_path.display().to_string();
        let mut fingerprint: Option<String> = None;
        if self.config.enable_fingerprint_skip {
            match fingerprint_source(file_path) {
                Ok(fp) => {
                    let last = get_last_good_fingerprint(&mut conn, dataset_id).await?;
                    info!(fingerprint = %fp, last_fingerprint = ?last, "Source fingerprint");
                    if last.as_deref() == Some(fp.as_str()) {
                        let vid = start_version(
                            &mut conn,
                            dataset_id,
                            dataset_code,
                            snapshot_date,
                            &source_path,
                            Some(&fp),
                        )
                        .await?;
                        *version_id = Some(vid);
                        finish_version(&mut conn, vid, VersionStatus::SkippedNoChanges, None)
                            .await?;
                        info!(dataset = dataset_code, "No changes detected, skipping");
                        return Ok(FileOutcome::Skipped);
                    }
                    fingerprint = Some(fp);
                },
                Err(e) => {
                    warn!(error = %e, "Fingerprint failed, continuing without skip");
                },
            }
        }

        let vid = start_version(
            &mut conn,
            dataset_id,
            dataset_code,
            snapshot_date,
            &source_path,
            fingerprint.as_deref(),
        )
        .await?;
        *version_id = Some(vid);

        if is_spatial {
            // The loader commits through its own connections, so this path
            // cannot run inside one transaction.
            let loader =
                GeometryLoader::new(self.config.loader.clone(), &self.config.db.url).await?;
            staging::process_shapefile(
                &mut conn,
                &loader,
                dataset_id,
                file_path,
                snapshot_date,
                vid,
                &self.config.ingest_sql_path,
            )
            .await?;
            finish_version(&mut conn, vid, VersionStatus::Completed, None).await?;
        } else {
            let mut tx = conn.begin().await?;
            staging::process_csv(
                &mut *tx,
                dataset_id,
                dataset_code,
                file_path,
                snapshot_date,
                vid,
                &self.config.ingest_sql_path,
            )
            .await?;
            finish_version(&mut *tx, vid, VersionStatus::Completed, None).await?;
            tx.commit().await.context("Failed to commit ingest transaction")?;
        }

        info!(dataset = dataset_code, "Ingestion completed");
        Ok(FileOutcome::Ingested)
    }

    /// Ingest every primary file of the given artifacts.
    ///
    /// Takes owned inputs: the `ArtifactIngestor` boundary boxes this future
    /// as `Send`, and borrowed parameters fail that proof against the sqlx
    /// executor lifetimes inside [`Self::try_ingest`].
    async fn ingest_all(&self, artifacts: Vec<DatasetArtifact>, snapshot_date: String) -> bool {
        let mut ok_all = true;
        for artifact in &artifacts {
            for file in artifact.files.iter().filter(|p| is_primary_file(p)) {
                if self
                    .ingest_file(&artifact.category, file, &snapshot_date)
                    .await
                    .is_err()
                {
                    ok_all = false;
                }
            }
        }
        ok_all
    }

    /// Record FAILED on a fresh connection; the failing one may be dead.
    async fn record_failure(&self, version_id: i64, err: &anyhow::Error) {
        match self.pool.acquire().await {
            Ok(mut conn) => {
                if let Err(e) = finish_version(
                    &mut conn,
                    version_id,
                    VersionStatus::Failed,
                    Some(&format!("{err:#}")),
                )
                .await
                {
                    error!(error = %e, "Could not record FAILED version status");
                }
            },
            Err(e) => error!(error = %e, "Could not acquire connection to record failure"),
        }
    }
}

#[async_trait]
impl ArtifactIngestor for IngestPipeline {
    /// Ingest every primary file of the changed artifacts.
    ///
    /// A failing file marks the run unsuccessful but does not stop its
    /// siblings.
    async fn ingest(&self, artifacts: &[DatasetArtifact], snapshot_date: &str) -> bool {
        self.ingest_all(artifacts.to_vec(), snapshot_date.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_derive_dataset_code_uppercases_stem() {
        assert_eq!(
            derive_dataset_code(Path::new("work/URL/lista_embargos_ibama.csv")),
            "LISTA_EMBARGOS_IBAMA"
        );
        assert_eq!(derive_dataset_code(Path::new("parcels.shp")), "PARCELS");
    }

    #[test]
    fn test_ingestor_future_is_send() {
        fn require_send<T: Send>(_: &T) {}

        // connect_lazy builds the pool without touching the network
        let pool = PgPool::connect_lazy("postgresql://u:p@localhost:5432/landwatch").unwrap();
        let pipeline = IngestPipeline::new(pool, IngestConfig::default());
        let artifacts: Vec<DatasetArtifact> = Vec::new();
        let fut = ArtifactIngestor::ingest(&pipeline, &artifacts, "2025-08-01");
        require_send(&fut);
        drop(fut);
    }

    #[test]
    fn test_primary_file_detection() {
        assert!(is_primary_file(&PathBuf::from("a.shp")));
        assert!(is_primary_file(&PathBuf::from("a.SHP")));
        assert!(is_primary_file(&PathBuf::from("a.csv")));
        assert!(!is_primary_file(&PathBuf::from("a.dbf")));
        assert!(!is_primary_file(&PathBuf::from("a.prj")));
        assert!(!is_primary_file(&PathBuf::from("a")));
    }
}
