//! Artifact fingerprinting for change detection
//!
//! A fingerprint summarizes the name, content hash and size of every file in
//! an artifact. Two artifacts with byte-identical files under the same names
//! produce the same fingerprint regardless of filesystem iteration order; any
//! byte change, size change, or added/removed file changes it.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Shapefile sidecar extensions that participate in a fingerprint.
const SHAPEFILE_EXTENSIONS: &[&str] = &[
    ".shp", ".shx", ".dbf", ".prj", ".cpg", ".qix", ".fix", ".sbn", ".sbx", ".shp.xml",
];

/// Per-file digest entry inside the canonical fingerprint document.
#[derive(Debug, Serialize)]
struct FileDigest {
    sha256: String,
    size: u64,
}

/// Compute the streamed SHA-256 of a single file.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute a deterministic fingerprint over a set of files.
///
/// Files are keyed by name and sorted case-insensitively; missing files are
/// skipped rather than treated as errors. The per-file digest map is
/// serialized as canonical JSON (BTreeMap gives deterministic key order) and
/// hashed again.
pub fn fingerprint_files(files: &[PathBuf]) -> Result<String> {
    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort_by_key(|p| file_name_lower(p));

    let mut digests: BTreeMap<String, FileDigest> = BTreeMap::new();
    for path in sorted {
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = std::fs::metadata(path)?.len();
        digests.insert(
            name,
            FileDigest {
                sha256: hash_file(path)?,
                size,
            },
        );
    }

    let canonical = serde_json::to_string(&digests)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint one source path, expanding shapefiles into their component set.
pub fn fingerprint_source(path: &Path) -> Result<String> {
    let files = if is_shapefile(path) {
        shapefile_components(path)
    } else {
        vec![path.to_path_buf()]
    };
    fingerprint_files(&files)
}

/// Discover the component files of a shapefile by its fixed extension set.
///
/// Missing components are excluded, not errors. The primary `.shp` is always
/// included when it exists; the result is deduplicated and name-sorted.
pub fn shapefile_components(shp_path: &Path) -> Vec<PathBuf> {
    let stem = match shp_path.file_stem() {
        Some(s) => s.to_string_lossy().into_owned(),
        None => return vec![shp_path.to_path_buf()],
    };
    let parent = shp_path.parent().unwrap_or_else(|| Path::new("."));

    let mut paths: Vec<PathBuf> = Vec::new();
    for ext in SHAPEFILE_EXTENSIONS {
        let candidate = parent.join(format!("{stem}{ext}"));
        if candidate.is_file() {
            paths.push(candidate);
        }
    }
    if shp_path.is_file() && !paths.contains(&shp_path.to_path_buf()) {
        paths.insert(0, shp_path.to_path_buf());
    }

    paths.sort_by_key(|p| file_name_lower(p));
    paths.dedup();
    paths
}

/// Whether a path looks like the primary member of a shapefile set.
pub fn is_shapefile(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("shp"))
        .unwrap_or(false)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_fingerprint_deterministic_regardless_of_order() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.dbf", b"attributes");
        let b = write(&dir, "B.shp", b"geometry");

        let forward = fingerprint_files(&[a.clone(), b.clone()]).unwrap();
        let reversed = fingerprint_files(&[b, a]).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_fingerprint_sensitive_to_content_change() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.csv", b"col1;col2\n1;2\n");
        let before = fingerprint_files(&[a.clone()]).unwrap();

        fs::write(&a, b"col1;col2\n1;3\n").unwrap();
        let after = fingerprint_files(&[a]).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_sensitive_to_file_set_change() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "base.shp", b"geometry");
        let one = fingerprint_files(&[a.clone()]).unwrap();

        let b = write(&dir, "base.prj", b"projection");
        let two = fingerprint_files(&[a, b]).unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn test_fingerprint_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "present.csv", b"data");
        let missing = dir.path().join("absent.csv");

        let with_missing = fingerprint_files(&[a.clone(), missing]).unwrap();
        let without = fingerprint_files(&[a]).unwrap();
        assert_eq!(with_missing, without);
    }

    #[test]
    fn test_shapefile_components_excludes_missing() {
        let dir = TempDir::new().unwrap();
        let shp = write(&dir, "area.shp", b"geometry");
        write(&dir, "area.dbf", b"attributes");
        write(&dir, "area.prj", b"projection");
        write(&dir, "unrelated.shx", b"other");

        let components = shapefile_components(&shp);
        let names: Vec<String> = components
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["area.dbf", "area.prj", "area.shp"]);
    }

    #[test]
    fn test_is_shapefile_case_insensitive() {
        assert!(is_shapefile(Path::new("UF.SHP")));
        assert!(is_shapefile(Path::new("uf.shp")));
        assert!(!is_shapefile(Path::new("uf.csv")));
    }
}
