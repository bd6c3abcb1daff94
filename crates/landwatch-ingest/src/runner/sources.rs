//! Dataset sources
//!
//! A source materializes a category's artifacts into the working directory.
//! Network downloaders are external collaborators; the built-in source scans
//! a directory of already-materialized files, which also serves as the
//! reuse path after a failed run.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use landwatch_common::types::DatasetArtifact;

/// Produces the artifacts of one category for a run.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    fn category(&self) -> &str;

    /// Materialize artifacts under `work_dir` and describe them.
    async fn fetch(&self, work_dir: &Path, snapshot_date: &str)
        -> Result<Vec<DatasetArtifact>>;

    /// Re-apply source-specific selection to externally scanned artifacts.
    /// Used when a failed run's local files are reused instead of fetched.
    fn filter(&self, artifacts: Vec<DatasetArtifact>) -> Vec<DatasetArtifact> {
        artifacts
    }
}

/// Selection filters for sources whose categories span workspaces and years.
#[derive(Debug, Clone, Default)]
pub struct SourceFilters {
    /// Workspace names; matched as dataset-code prefixes after
    /// normalizing `-` to `_` and uppercasing.
    pub workspaces: Vec<String>,
    /// Years; matched as dataset-code suffixes.
    pub years: Vec<String>,
}

impl SourceFilters {
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty() && self.years.is_empty()
    }

    pub fn apply(&self, artifacts: Vec<DatasetArtifact>) -> Vec<DatasetArtifact> {
        let prefixes: Vec<String> = self
            .workspaces
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| w.trim().replace('-', "_").to_uppercase())
            .collect();
        let suffixes: Vec<String> = self
            .years
            .iter()
            .filter(|y| !y.trim().is_empty())
            .map(|y| y.trim().to_string())
            .collect();

        artifacts
            .into_iter()
            .filter(|a| {
                prefixes.is_empty() || prefixes.iter().any(|p| a.dataset_code.starts_with(p))
            })
            .filter(|a| {
                suffixes.is_empty() || suffixes.iter().any(|s| a.dataset_code.ends_with(s))
            })
            .collect()
    }
}

/// Scan `work_dir/{category}` for shapefile and CSV artifacts.
///
/// Shapefiles group with every sibling sharing their stem (sidecars
/// included); CSVs stand alone. The dataset code is the uppercased stem.
pub async fn scan_local_artifacts(
    work_dir: &Path,
    category: &str,
    snapshot_date: &str,
) -> Result<Vec<DatasetArtifact>> {
    let category_dir = work_dir.join(category);
    if !category_dir.exists() {
        return Ok(Vec::new());
    }

    let mut primaries: Vec<PathBuf> = Vec::new();
    let mut stack = vec![category_dir];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if has_extension(&path, "shp") || has_extension(&path, "csv") {
                primaries.push(path);
            }
        }
    }
    primaries.sort();

    let mut artifacts = Vec::with_capacity(primaries.len());
    for primary in primaries {
        let files = if has_extension(&primary, "shp") {
            sibling_files(&primary).await?
        } else {
            vec![primary.clone()]
        };
        if files.is_empty() {
            continue;
        }
        let dataset_code = primary
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_uppercase())
            .unwrap_or_default();
        artifacts.push(DatasetArtifact::new(
            category,
            dataset_code,
            files,
            snapshot_date,
        ));
    }

    Ok(artifacts)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Every file in the primary's directory sharing its stem.
async fn sibling_files(primary: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = primary.parent() else {
        return Ok(vec![primary.to_path_buf()]);
    };
    let Some(stem) = primary.file_stem().map(|s| s.to_string_lossy().to_string()) else {
        return Ok(vec![primary.to_path_buf()]);
    };

    let wanted_prefix = format!("{stem}.");
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&wanted_prefix) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Directory-backed source: `fetch` is the local scan itself.
pub struct LocalDirSource {
    category: String,
    filters: SourceFilters,
}

impl LocalDirSource {
    pub fn new(category: impl Into<String>, filters: SourceFilters) -> Self {
        Self {
            category: category.into(),
            filters,
        }
    }
}

#[async_trait]
impl DatasetSource for LocalDirSource {
    fn category(&self) -> &str {
        &self.category
    }

    async fn fetch(
        &self,
        work_dir: &Path,
        snapshot_date: &str,
    ) -> Result<Vec<DatasetArtifact>> {
        let artifacts = scan_local_artifacts(work_dir, &self.category, snapshot_date).await?;
        Ok(self.filters.apply(artifacts))
    }

    fn filter(&self, artifacts: Vec<DatasetArtifact>) -> Vec<DatasetArtifact> {
        self.filters.apply(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(code: &str) -> DatasetArtifact {
        DatasetArtifact::new("PRODES", code, vec![PathBuf::from("x.shp")], "2025-08-01")
    }

    #[test]
    fn test_filters_by_workspace_prefix() {
        let filters = SourceFilters {
            workspaces: vec!["prodes-mata-atlantica".to_string()],
            years: Vec::new(),
        };
        let kept = filters.apply(vec![
            artifact("PRODES_MATA_ATLANTICA_2021"),
            artifact("PRODES_CERRADO_2021"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dataset_code, "PRODES_MATA_ATLANTICA_2021");
    }

    #[test]
    fn test_filters_by_year_suffix() {
        let filters = SourceFilters {
            workspaces: Vec::new(),
            years: vec!["2021".to_string(), "2022".to_string()],
        };
        let kept = filters.apply(vec![
            artifact("PRODES_CERRADO_2020"),
            artifact("PRODES_CERRADO_2021"),
            artifact("PRODES_CERRADO_2022"),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_empty_filters_keep_everything() {
        let filters = SourceFilters::default();
        assert!(filters.is_empty());
        assert_eq!(filters.apply(vec![artifact("A"), artifact("B")]).len(), 2);
    }

    #[tokio::test]
    async fn test_scan_groups_shapefile_sidecars() {
        let dir = TempDir::new().unwrap();
        let category_dir = dir.path().join("PRODES");
        tokio::fs::create_dir_all(&category_dir).await.unwrap();
        for name in ["area.shp", "area.shx", "area.dbf", "area.prj", "other.txt"] {
            tokio::fs::write(category_dir.join(name), b"x").await.unwrap();
        }
        tokio::fs::write(category_dir.join("lista.csv"), b"a;b\n1;2\n")
            .await
            .unwrap();

        let artifacts = scan_local_artifacts(dir.path(), "PRODES", "2025-08-01")
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        let shp = artifacts.iter().find(|a| a.dataset_code == "AREA").unwrap();
        assert_eq!(shp.files.len(), 4);
        let csv = artifacts.iter().find(|a| a.dataset_code == "LISTA").unwrap();
        assert_eq!(csv.files.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_missing_category_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let artifacts = scan_local_artifacts(dir.path(), "DETER", "2025-08-01")
            .await
            .unwrap();
        assert!(artifacts.is_empty());
    }
}
