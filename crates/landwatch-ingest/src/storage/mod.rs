//! Polymorphic run storage
//!
//! Manifests and raw artifact copies live either on a local filesystem root
//! or in an S3-compatible blob container under a shared key prefix. Both
//! backends expose identical semantics: uploads overwrite idempotently,
//! reads of missing paths return `None`, listings return paths relative to
//! the prefix. Backend identity never leaks out of this module.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{StorageConfig, StorageMode};

/// Storage backend selected by configuration.
#[derive(Clone)]
pub enum Storage {
    Local(LocalStorage),
    Blob(BlobStorage),
}

impl Storage {
    /// Build the backend selected by `config.mode`.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        match config.mode {
            StorageMode::Local => Ok(Self::local(&config.local_root)),
            StorageMode::Blob => Ok(Storage::Blob(BlobStorage::new(config).await?)),
        }
    }

    /// Local-filesystem backend rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Storage::Local(LocalStorage { root: root.into() })
    }

    /// Upload a local file to `rel_path`, overwriting any existing object.
    pub async fn upload_file(&self, local_path: &Path, rel_path: &str) -> Result<()> {
        match self {
            Storage::Local(s) => s.upload_file(local_path, rel_path).await,
            Storage::Blob(s) => s.upload_file(local_path, rel_path).await,
        }
    }

    /// Write a text object at `rel_path`, overwriting any existing object.
    pub async fn write_text(&self, rel_path: &str, text: &str) -> Result<()> {
        match self {
            Storage::Local(s) => s.write_text(rel_path, text).await,
            Storage::Blob(s) => s.write_text(rel_path, text).await,
        }
    }

    /// Read a text object; missing paths are `None`, not errors.
    pub async fn read_text(&self, rel_path: &str) -> Result<Option<String>> {
        match self {
            Storage::Local(s) => s.read_text(rel_path).await,
            Storage::Blob(s) => s.read_text(rel_path).await,
        }
    }

    /// List object paths (relative to the storage root/prefix) under `prefix`.
    pub async fn list_paths(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            Storage::Local(s) => s.list_paths(prefix).await,
            Storage::Blob(s) => s.list_paths(prefix).await,
        }
    }

    /// Delete one object; deleting a missing path is not an error.
    pub async fn delete_path(&self, rel_path: &str) -> Result<()> {
        match self {
            Storage::Local(s) => s.delete_path(rel_path).await,
            Storage::Blob(s) => s.delete_path(rel_path).await,
        }
    }
}

// ============================================================================
// Local filesystem backend
// ============================================================================

#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    async fn upload_file(&self, local_path: &Path, rel_path: &str) -> Result<()> {
        let target = self.root.join(rel_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .with_context(|| format!("Failed to copy {} into storage", local_path.display()))?;
        Ok(())
    }

    async fn write_text(&self, rel_path: &str, text: &str) -> Result<()> {
        let target = self.root.join(rel_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, text)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(())
    }

    async fn read_text(&self, rel_path: &str) -> Result<Option<String>> {
        let target = self.root.join(rel_path);
        match tokio::fs::read_to_string(&target).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", target.display())),
        }
    }

    async fn list_paths(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.root.join(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    paths.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn delete_path(&self, rel_path: &str) -> Result<()> {
        let target = self.root.join(rel_path);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", target.display())),
        }
    }
}

// ============================================================================
// S3-compatible blob backend
// ============================================================================

#[derive(Clone)]
pub struct BlobStorage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl BlobStorage {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        debug!("Initializing blob storage for bucket {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "landwatch-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!("Blob storage client initialized for bucket {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, rel_path: &str) -> String {
        if self.prefix.is_empty() {
            rel_path.trim_start_matches('/').to_string()
        } else {
            format!("{}/{}", self.prefix, rel_path.trim_start_matches('/'))
        }
    }

    async fn upload_file(&self, local_path: &Path, rel_path: &str) -> Result<()> {
        let key = self.key(rel_path);
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to open {}", local_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, key))?;

        debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn write_text(&self, rel_path: &str, text: &str) -> Result<()> {
        let key = self.key(rel_path);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(text.as_bytes().to_vec()))
            .content_type("application/json")
            .send()
            .await
            .with_context(|| format!("Failed to write s3://{}/{}", self.bucket, key))?;
        Ok(())
    }

    async fn read_text(&self, rel_path: &str) -> Result<Option<String>> {
        let key = self.key(rel_path);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") || msg.contains("NotFound") || msg.contains("404") {
                    return Ok(None);
                }
                return Err(e).with_context(|| {
                    format!("Failed to read s3://{}/{}", self.bucket, key)
                });
            },
        };

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read blob body")?
            .into_bytes();
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn list_paths(&self, prefix: &str) -> Result<Vec<String>> {
        let key_prefix = self.key(prefix);
        let mut paths = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .context("Failed to list blob objects")?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    let rel = if self.prefix.is_empty() {
                        key.to_string()
                    } else {
                        key.trim_start_matches(&format!("{}/", self.prefix)).to_string()
                    };
                    paths.push(rel);
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        paths.sort();
        Ok(paths)
    }

    async fn delete_path(&self, rel_path: &str) -> Result<()> {
        let key = self.key(rel_path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());

        storage
            .write_text("manifests/URL/run1.json", "{\"run_id\":\"run1\"}")
            .await
            .unwrap();

        let text = storage.read_text("manifests/URL/run1.json").await.unwrap();
        assert_eq!(text.as_deref(), Some("{\"run_id\":\"run1\"}"));
    }

    #[tokio::test]
    async fn test_local_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());
        assert!(storage.read_text("no/such/path.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_overwrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());

        storage.write_text("a.txt", "first").await.unwrap();
        storage.write_text("a.txt", "second").await.unwrap();
        assert_eq!(
            storage.read_text("a.txt").await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_local_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::local(dir.path());

        storage.write_text("manifests/URL/a.json", "{}").await.unwrap();
        storage.write_text("manifests/URL/b.json", "{}").await.unwrap();
        storage.write_text("manifests/OTHER/c.json", "{}").await.unwrap();

        let listed = storage.list_paths("manifests/URL").await.unwrap();
        assert_eq!(listed, vec!["manifests/URL/a.json", "manifests/URL/b.json"]);

        storage.delete_path("manifests/URL/a.json").await.unwrap();
        let listed = storage.list_paths("manifests/URL").await.unwrap();
        assert_eq!(listed, vec!["manifests/URL/b.json"]);

        // deleting again is a no-op
        storage.delete_path("manifests/URL/a.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_upload_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.csv");
        std::fs::write(&source, b"col\n1\n").unwrap();

        let storage_dir = TempDir::new().unwrap();
        let storage = Storage::local(storage_dir.path());
        storage
            .upload_file(&source, "raw/URL/run1/source.csv")
            .await
            .unwrap();

        let listed = storage.list_paths("raw/URL/run1").await.unwrap();
        assert_eq!(listed, vec!["raw/URL/run1/source.csv"]);
    }
}
