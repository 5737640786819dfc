//! Storage backend seam and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use naptha_core::{Error, Result};
use parking_lot::RwLock;

use crate::id::StorageId;

/// Where artifacts live. Content-addressed objects are keyed by hex digest.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `data` under an id chosen by the backend.
    async fn put(&self, data: Bytes) -> Result<StorageId>;

    /// Store `data` under its content digest.
    async fn put_content(&self, digest: &str, data: Bytes) -> Result<()>;

    async fn contains_content(&self, digest: &str) -> Result<bool>;

    /// Fetch an object. Unknown ids fail with `Error::StorageNotFound`.
    async fn get(&self, id: &StorageId) -> Result<Bytes>;
}

/// Process-local backend used in tests and dry runs.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
    next_id: AtomicU64,
    uploads: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads actually stored, including overwrites.
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(&self, data: Bytes) -> Result<StorageId> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = StorageId::parse(&format!("mem-{}", n))?;
        self.objects.write().insert(id.to_string(), data);
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn put_content(&self, digest: &str, data: Bytes) -> Result<()> {
        self.objects.write().insert(format!("sha256:{}", digest), data);
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn contains_content(&self, digest: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(&format!("sha256:{}", digest)))
    }

    async fn get(&self, id: &StorageId) -> Result<Bytes> {
        self.objects
            .read()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| Error::StorageNotFound(id.to_string()))
    }
}
