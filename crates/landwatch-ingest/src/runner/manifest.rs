//! Run manifests
//!
//! One JSON manifest per category per run, stored at
//! `manifests/{category}/{run_id}.json`. The manifest records every artifact
//! of the run (not just changed ones) with its fingerprint, plus the final
//! category status. Because run ids sort chronologically, "latest manifest"
//! is a name sort, and the previous run's fingerprints drive change
//! detection for the next one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use landwatch_common::fingerprint::fingerprint_files;
use landwatch_common::types::{DatasetArtifact, RunStatus};

use crate::storage::Storage;

/// One dataset's entry in a run manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub dataset_code: String,
    pub snapshot_date: String,
    /// File names only; paths are workspace-relative and not portable.
    pub files: Vec<String>,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Manifest of one category in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub category: String,
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub status: RunStatus,
}

/// Build the manifest for a run's artifacts.
///
/// A fingerprint failure leaves that entry's fingerprint empty (forcing a
/// reload next run) rather than failing a run that already ingested.
pub fn build_manifest(run_id: &str, category: &str, artifacts: &[DatasetArtifact]) -> RunManifest {
    let datasets = artifacts
        .iter()
        .map(|artifact| {
            let fingerprint = match fingerprint_files(&artifact.files) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warn!(
                        dataset = %artifact.dataset_code,
                        error = %e,
                        "Could not fingerprint artifact for manifest"
                    );
                    None
                },
            };
            DatasetEntry {
                dataset_code: artifact.dataset_code.clone(),
                snapshot_date: artifact.snapshot_date.clone(),
                files: artifact.file_names(),
                fingerprint,
                extra: artifact.extra.clone(),
            }
        })
        .collect();

    RunManifest {
        run_id: run_id.to_string(),
        category: category.to_string(),
        datasets,
        status: RunStatus::default(),
    }
}

fn manifest_path(category: &str, run_id: &str) -> String {
    format!("manifests/{category}/{run_id}.json")
}

pub async fn save_manifest(storage: &Storage, manifest: &RunManifest) -> Result<()> {
    let path = manifest_path(&manifest.category, &manifest.run_id);
    let payload =
        serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
    storage.write_text(&path, &payload).await?;
    info!(path, "Saved run manifest");
    Ok(())
}

/// Load the newest manifest for a category, if any.
pub async fn load_latest_manifest(storage: &Storage, category: &str) -> Result<Option<RunManifest>> {
    let prefix = format!("manifests/{category}");
    let mut names: Vec<String> = storage
        .list_paths(&prefix)
        .await?
        .into_iter()
        .filter(|p| p.ends_with(".json"))
        .collect();
    names.sort();

    let Some(latest) = names.last() else {
        return Ok(None);
    };
    let Some(payload) = storage.read_text(latest).await? else {
        return Ok(None);
    };
    let manifest = serde_json::from_str(&payload)
        .with_context(|| format!("Malformed manifest {latest}"))?;
    Ok(Some(manifest))
}

/// Fingerprint of a dataset in the previous manifest.
///
/// A failed previous run is distrusted entirely: its fingerprints may
/// describe data that never reached the catalog.
pub fn prev_fingerprint<'a>(
    prev_manifest: Option<&'a RunManifest>,
    dataset_code: &str,
) -> Option<&'a str> {
    let manifest = prev_manifest?;
    if manifest.status == RunStatus::Failed {
        return None;
    }
    manifest
        .datasets
        .iter()
        .find(|d| d.dataset_code == dataset_code)
        .and_then(|d| d.fingerprint.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn manifest_with(status: RunStatus, fingerprint: &str) -> RunManifest {
        RunManifest {
            run_id: "20250801T000000Z".to_string(),
            category: "URL".to_string(),
            datasets: vec![DatasetEntry {
                dataset_code: "PARCELS".to_string(),
                snapshot_date: "2025-08-01".to_string(),
                files: vec!["parcels.shp".to_string()],
                fingerprint: Some(fingerprint.to_string()),
                extra: BTreeMap::new(),
            }],
            status,
        }
    }

    #[test]
    fn test_prev_fingerprint_found_by_dataset_code() {
        let manifest = manifest_with(RunStatus::Ingested, "abc123");
        assert_eq!(prev_fingerprint(Some(&manifest), "PARCELS"), Some("abc123"));
        assert_eq!(prev_fingerprint(Some(&manifest), "OTHER"), None);
        assert_eq!(prev_fingerprint(None, "PARCELS"), None);
    }

    #[test]
    fn test_prev_fingerprint_distrusts_failed_manifest() {
        let manifest = manifest_with(RunStatus::Failed, "abc123");
        assert_eq!(prev_fingerprint(Some(&manifest), "PARCELS"), None);
    }

    #[tokio::test]
    async fn test_manifest_round_trip_and_latest_selection() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());

        let mut first = manifest_with(RunStatus::Ingested, "aaa");
        first.run_id = "20250801T000000Z".to_string();
        let mut second = manifest_with(RunStatus::Skipped, "bbb");
        second.run_id = "20250802T000000Z".to_string();

        save_manifest(&storage, &first).await.unwrap();
        save_manifest(&storage, &second).await.unwrap();

        let latest = load_latest_manifest(&storage, "URL").await.unwrap().unwrap();
        assert_eq!(latest.run_id, "20250802T000000Z");
        assert_eq!(latest.status, RunStatus::Skipped);
        assert_eq!(latest.datasets[0].fingerprint.as_deref(), Some("bbb"));
    }

    #[tokio::test]
    async fn test_load_latest_empty_category_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());
        assert!(load_latest_manifest(&storage, "URL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_build_manifest_fingerprints_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("lista.csv");
        tokio::fs::write(&file, b"DOC;NAME\n1;x\n").await.unwrap();

        let artifact = DatasetArtifact::new(
            "URL",
            "LISTA",
            vec![PathBuf::from(&file)],
            "2025-08-01",
        );
        let manifest = build_manifest("20250801T000000Z", "URL", &[artifact]);

        assert_eq!(manifest.datasets.len(), 1);
        assert_eq!(manifest.datasets[0].files, vec!["lista.csv"]);
        assert!(manifest.datasets[0].fingerprint.is_some());
        assert_eq!(manifest.status, RunStatus::Skipped);
    }
}
