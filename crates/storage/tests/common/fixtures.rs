use bytes::Bytes;
use canopy_storage::FilesystemBackend;
use std::sync::Arc;
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output (reproducible tests).
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Filesystem blob store rooted in a temp directory that is removed on drop.
#[allow(dead_code)]
pub struct TestBlobs {
    pub backend: Arc<FilesystemBackend>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestBlobs {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path(), Some("http://blobs.test"))
            .await
            .expect("Failed to create filesystem backend");
        Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        }
    }

    /// Read back the bytes behind a URL issued by the backend.
    pub async fn read(&self, url: &str) -> Option<Vec<u8>> {
        let key = url.strip_prefix("http://blobs.test/")?;
        tokio::fs::read(self.backend.root().join(key)).await.ok()
    }
}
