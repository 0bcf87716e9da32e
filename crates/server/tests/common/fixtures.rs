//! Test fixtures for generating test data and checking tree sizes.

use async_trait::async_trait;
use bytes::Bytes;
use canopy_cache::{CacheError, CacheResult, MemorySizeCache, SizeCache};
use canopy_core::TransactionStatus;
use canopy_metadata::MetadataStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// In-memory size cache whose reads and writes can be switched off.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FlakyCache {
    inner: MemorySizeCache,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl FlakyCache {
    pub fn new() -> Self {
        Self {
            inner: MemorySizeCache::new(None),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop every entry, as if the cache had restarted.
    pub async fn wipe(&self, keys: &[String]) {
        for key in keys {
            self.inner.remove(key).await.expect("remove");
        }
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("switched off by test".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SizeCache for FlakyCache {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64) -> CacheResult<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn multi_get(&self, keys: &[String]) -> CacheResult<Vec<(String, i64)>> {
        self.check()?;
        self.inner.multi_get(keys).await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.check()?;
        self.inner.increment(key, delta).await
    }

    async fn health_check(&self) -> CacheResult<()> {
        self.check()
    }
}

/// Assert that every folder owned by `owner_id` stores exactly the bytes of
/// the settled files below it. Files of pending transactions do not count.
#[allow(dead_code)]
pub async fn assert_sizes_consistent(store: &dyn MetadataStore, owner_id: i64) {
    let mut pending_cache: HashMap<i64, bool> = HashMap::new();
    for root in store
        .list_root_folders(owner_id)
        .await
        .expect("list roots")
    {
        check_subtree(store, root.id, &mut pending_cache).await;
    }
}

/// Returns the expected size of the subtree after checking it.
fn check_subtree<'a, 'b>(
    store: &'a dyn MetadataStore,
    folder_id: i64,
    pending_cache: &'b mut HashMap<i64, bool>,
) -> futures::future::BoxFuture<'b, i64>
where
    'a: 'b,
{
    Box::pin(async move {
        let folder = store
            .get_folder(folder_id)
            .await
            .expect("get folder")
            .expect("folder exists");

        let mut expected = 0;
        for file in store.list_files(folder_id).await.expect("list files") {
            let pending = match file.transaction_id {
                Some(tid) => match pending_cache.get(&tid).copied() {
                    Some(pending) => pending,
                    None => {
                        // Transaction rows go away with their folder; such files are settled.
                        let pending = store
                            .get_transaction(tid)
                            .await
                            .expect("get transaction")
                            .is_some_and(|t| {
                                t.status().expect("status") == TransactionStatus::Pending
                            });
                        pending_cache.insert(tid, pending);
                        pending
                    }
                },
                None => false,
            };
            if !pending {
                expected += file.size;
            }
        }
        for child in store.list_children(folder_id).await.expect("list children") {
            expected += check_subtree(store, child.id, &mut *pending_cache).await;
        }

        assert_eq!(
            folder.size, expected,
            "folder {} ({}) size disagrees with its contents",
            folder.id, folder.name
        );
        expected
    })
}
