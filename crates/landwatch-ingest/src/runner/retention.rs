//! Retention and local cleanup
//!
//! Storage keeps the newest N manifests per category; anything older loses
//! both its manifest and its `raw/{category}/{run_id}` tree. Local artifact
//! files are deleted once a run no longer needs them, tolerating every
//! individual failure.

use anyhow::Result;
use tracing::{debug, info};

use landwatch_common::types::DatasetArtifact;

use crate::storage::Storage;

/// Delete manifests and raw trees beyond the newest `retention_runs`.
pub async fn cleanup_category(
    storage: &Storage,
    category: &str,
    retention_runs: usize,
) -> Result<()> {
    let prefix = format!("manifests/{category}");
    let mut names: Vec<String> = storage
        .list_paths(&prefix)
        .await?
        .into_iter()
        .filter(|p| p.ends_with(".json"))
        .collect();
    names.sort();

    if names.len() <= retention_runs {
        return Ok(());
    }

    let remove_count = names.len() - retention_runs;
    for manifest_path in names.into_iter().take(remove_count) {
        let run_id = manifest_path
            .rsplit('/')
            .next()
            .unwrap_or(&manifest_path)
            .trim_end_matches(".json")
            .to_string();

        let raw_prefix = format!("raw/{category}/{run_id}");
        for path in storage.list_paths(&raw_prefix).await? {
            storage.delete_path(&path).await?;
        }
        storage.delete_path(&manifest_path).await?;
        info!(category, run_id, "Removed expired run from storage");
    }

    Ok(())
}

/// Delete local artifact files and prune emptied parent directories.
pub async fn cleanup_files(artifacts: &[DatasetArtifact]) {
    for artifact in artifacts {
        for file in &artifact.files {
            if let Err(e) = tokio::fs::remove_file(file).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(file = %file.display(), error = %e, "Could not remove artifact file");
                }
            }
        }
        if let Some(parent) = artifact.files.first().and_then(|f| f.parent()) {
            // rmdir fails on non-empty directories, which is the intent
            let _ = tokio::fs::remove_dir(parent).await;
        }
    }
}
