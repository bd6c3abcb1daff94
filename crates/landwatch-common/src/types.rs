//! Common types used across LandWatch

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One dataset's downloaded content for one snapshot date.
///
/// Produced by a downloader collaborator, owned by the run orchestrator for
/// the duration of one run, and discarded (files deleted) after a successful
/// or skipped ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetArtifact {
    pub category: String,
    pub dataset_code: String,
    pub files: Vec<PathBuf>,
    pub snapshot_date: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl DatasetArtifact {
    pub fn new(
        category: impl Into<String>,
        dataset_code: impl Into<String>,
        files: Vec<PathBuf>,
        snapshot_date: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            dataset_code: dataset_code.into(),
            files,
            snapshot_date: snapshot_date.into(),
            extra: BTreeMap::new(),
        }
    }

    /// File names (without directories) in declaration order.
    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }
}

/// Lifecycle status of a dataset version in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    Running,
    Completed,
    SkippedNoChanges,
    Failed,
}

impl VersionStatus {
    /// Catalog wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Running => "RUNNING",
            VersionStatus::Completed => "COMPLETED",
            VersionStatus::SkippedNoChanges => "SKIPPED_NO_CHANGES",
            VersionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall outcome of one category in one run, as persisted in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ingested,
    #[default]
    Skipped,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ingested => write!(f, "ingested"),
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Timestamp-derived run identifier, monotonically ordered by string sort.
pub fn now_run_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_status_wire_format() {
        assert_eq!(VersionStatus::Running.as_str(), "RUNNING");
        assert_eq!(VersionStatus::SkippedNoChanges.as_str(), "SKIPPED_NO_CHANGES");
    }

    #[test]
    fn test_run_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Ingested).unwrap();
        assert_eq!(json, "\"ingested\"");
        let back: RunStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, RunStatus::Failed);
    }

    #[test]
    fn test_run_id_sorts_chronologically() {
        let id = now_run_id();
        assert_eq!(id.len(), 16);
        assert!(id.ends_with('Z'));
        assert!(id.contains('T'));
    }

    #[test]
    fn test_artifact_file_names() {
        let artifact = DatasetArtifact::new(
            "URL",
            "CADASTRO_EMPREGADORES",
            vec![PathBuf::from("/work/URL/cadastro.csv")],
            "2025-01-01",
        );
        assert_eq!(artifact.file_names(), vec!["cadastro.csv"]);
    }
}
