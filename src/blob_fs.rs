//! Local filesystem blob store.
//!
//! Objects live under a root directory at their blob path
//! (`files/{owner}/{millis}_{name}`) and are addressed by `file://` URLs,
//! which [`crate::fetch::HttpFetcher`] can read back.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use cloudvault_core::store::BlobStore;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create blob directory '{}'", root.display()))?;
        let root = root.canonicalize()?;

        info!(path = %root.display(), "Blob store initialized");
        Ok(Self { root })
    }

    /// Resolve a blob path under the root, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => bail!("Invalid blob path: {}", path),
            }
        }
        if resolved == self.root {
            bail!("Invalid blob path: {}", path);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], _mime_type: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", path))?;

        debug!(path, size = bytes.len(), "Stored blob");
        let url = Url::from_file_path(&target)
            .map_err(|_| anyhow!("Blob path is not absolute: {}", target.display()))?;
        Ok(url.to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if !fs::try_exists(&target).await? {
            bail!("object not found: {}", path);
        }
        fs::remove_file(&target)
            .await
            .with_context(|| format!("Failed to delete blob {}", path))?;

        debug!(path, "Deleted blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_returns_readable_file_url() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().join("blobs")).await.unwrap();

        let url = store
            .put("files/u1/1000_a.txt", b"hello", "text/plain")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        let path = Url::parse(&url).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_delete_missing_errors() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().to_path_buf()).await.unwrap();

        store.put("files/u1/1_a", b"x", "text/plain").await.unwrap();
        store.delete("files/u1/1_a").await.unwrap();
        assert!(store.delete("files/u1/1_a").await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().to_path_buf()).await.unwrap();

        assert!(store.put("../escape", b"x", "text/plain").await.is_err());
        assert!(store.put("/etc/passwd", b"x", "text/plain").await.is_err());
    }
}
