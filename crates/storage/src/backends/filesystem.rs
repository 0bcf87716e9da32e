//! Local filesystem blob backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Longest file name fragment kept in a blob key.
const MAX_NAME_LEN: usize = 96;

/// Blob store writing into a local directory.
///
/// Blobs live at `<root>/<shard>/<uuid>-<name>` where the shard is the first
/// two hex digits of the uuid. URLs are `<base_url>/<key>`, or `file://` URLs
/// into the root when no base URL is configured.
pub struct FilesystemBackend {
    root: PathBuf,
    base_url: String,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>, public_base_url: Option<&str>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;

        let base_url = match public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("file://{}", root.display()),
        };

        Ok(Self { root, base_url })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }

    fn key_for_url<'a>(&self, url: &'a str) -> StorageResult<&'a str> {
        url.strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))
    }

    /// Resolve a key below the root, rejecting anything that could escape it.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        Ok(self.root.join(key))
    }
}

/// Reduce a client supplied file name to characters safe in a path segment.
fn sanitize_name(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "_");
    }
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "blob".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn upload(&self, data: Bytes, name: &str) -> StorageResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let key = format!("{}/{id}-{}", &id[..2], sanitize_name(name));
        let path = self.key_path(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp file, fsync, then rename so readers never see a partial blob.
        let temp_path = path.with_file_name(format!(".tmp.{id}"));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(key = %key, "Stored blob");
        Ok(self.url_for(&key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, url: &str) -> StorageResult<()> {
        let key = self.key_for_url(url)?;
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Blob already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_writes_blob_and_returns_url() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path(), Some("http://cdn.test/"))
            .await
            .unwrap();

        let url = backend
            .upload(Bytes::from_static(b"hello"), "greeting.txt")
            .await
            .unwrap();
        assert!(url.starts_with("http://cdn.test/"));
        assert!(url.ends_with("-greeting.txt"));

        let key = backend.key_for_url(&url).unwrap();
        let stored = fs::read(backend.root().join(key)).await.unwrap();
        assert_eq!(stored, b"hello");
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_urls() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path(), None).await.unwrap();

        let a = backend.upload(Bytes::from_static(b"a"), "x").await.unwrap();
        let b = backend.upload(Bytes::from_static(b"b"), "x").await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path(), None).await.unwrap();

        let url = backend.upload(Bytes::from_static(b"a"), "a.bin").await.unwrap();
        let path = backend.root().join(backend.key_for_url(&url).unwrap());
        assert!(path.exists());

        backend.delete(&url).await.unwrap();
        assert!(!path.exists());
        backend.delete(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_rejects_foreign_and_traversal_urls() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path(), Some("http://cdn.test"))
            .await
            .unwrap();

        let err = backend.delete("http://elsewhere/a").await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignUrl(_)));

        let err = backend
            .delete("http://cdn.test/../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_name("../../etc/passwd"), "____etc_passwd");
        assert_eq!(sanitize_name("my file (1).txt"), "my_file__1_.txt");
        assert_eq!(sanitize_name(""), "blob");
        assert_eq!(sanitize_name("..."), "_.");
        assert_eq!(sanitize_name(&"a".repeat(500)).len(), MAX_NAME_LEN);
    }
}
