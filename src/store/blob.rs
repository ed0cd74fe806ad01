// Blob-storage collaborator: image bytes in, public URL out.
//
// The core only consumes the URL; creation/add flows call `upload` and write
// the result into `imageUrl`/`iconUrl` fields.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use super::StoreError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `path` and return a URL for it.
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StoreError>;
}

/// Filesystem-backed blobs for single-node deployments: files under a root
/// directory, addressed by `file://` URLs.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StoreError> {
        // Reject traversal; blob paths are store-relative by contract.
        if path.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(StoreError::backend(anyhow::anyhow!(
                "invalid blob path: {path}"
            )));
        }

        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create blob directory for {path}"))
                .map_err(StoreError::Backend)?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write blob {path}"))
            .map_err(StoreError::Backend)?;

        Ok(format!("file://{}", target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("auction-hub-blob-{tag}-{}", crate::store::push_id()))
    }

    #[tokio::test]
    async fn upload_writes_bytes_and_returns_a_url() {
        let root = temp_root("roundtrip");
        let store = FsBlobStore::new(&root);
        let url = store
            .upload(b"png-bytes", "auction-images/a1/cover.png")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        let written = tokio::fs::read(root.join("auction-images/a1/cover.png"))
            .await
            .unwrap();
        assert_eq!(written, b"png-bytes");
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let store = FsBlobStore::new(temp_root("traversal"));
        assert!(store.upload(b"x", "../escape.png").await.is_err());
        assert!(store.upload(b"x", "a//b.png").await.is_err());
    }
}
