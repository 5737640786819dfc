//! Storage client: content addressing, dedupe, verification, file helpers.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use naptha_core::{BackoffPolicy, Error, Result};
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::id::StorageId;

#[derive(Clone)]
pub struct StorageClient {
    backend: Arc<dyn StorageBackend>,
    retry: BackoffPolicy,
}

impl StorageClient {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            retry: BackoffPolicy::submit_default(),
        }
    }

    /// Backoff for transport failures on every backend call.
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store `data`. Content-addressed writes derive the id locally and skip
    /// the upload when the backend already holds it.
    pub async fn write(&self, data: impl Into<Bytes>, content_addressed: bool) -> Result<StorageId> {
        let data = data.into();
        let backend = &self.backend;
        if !content_addressed {
            let id = self.retrying("write", || backend.put(data.clone())).await?;
            debug!("Stored object {}", id);
            return Ok(id);
        }

        let id = StorageId::for_content(&data);
        let digest = id.digest().unwrap_or_default();
        if self.retrying("lookup", || backend.contains_content(digest)).await? {
            debug!("Object {} already stored, skipping upload", id);
            return Ok(id);
        }
        self.retrying("write", || backend.put_content(digest, data.clone()))
            .await?;
        debug!("Stored object {}", id);
        Ok(id)
    }

    /// Fetch an object. Content-addressed reads are checked against the id.
    pub async fn read(&self, id: &StorageId) -> Result<Bytes> {
        let backend = &self.backend;
        let data = self.retrying("read", || backend.get(id)).await?;
        if !id.matches(&data) {
            return Err(Error::InvalidInput(format!(
                "object {} failed hash verification",
                id
            )));
        }
        Ok(data)
    }

    /// Run one backend call, retrying transport failures per the policy.
    async fn retrying<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match call().await {
                Err(e) if e.is_retryable() && self.retry.allows_retry(attempts) => {
                    let delay = self.retry.delay(attempts - 1);
                    warn!(
                        "Storage {} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempts, self.retry.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Write a file, or every file under a directory. Returns the id of
    /// each file in path order.
    pub async fn write_path(&self, path: &Path, content_addressed: bool) -> Result<Vec<(PathBuf, StorageId)>> {
        let mut files = Vec::new();
        collect_files(path, &mut files)?;
        if files.is_empty() {
            return Err(Error::InvalidInput(format!("no files under {}", path.display())));
        }
        files.sort();

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            let data = tokio::fs::read(&file).await?;
            let id = self.write(data, content_addressed).await?;
            info!("Wrote {} as {}", file.display(), id);
            stored.push((file, id));
        }
        Ok(stored)
    }

    /// Read an object into `output_dir`, named after its id.
    pub async fn read_to_dir(&self, id: &StorageId, output_dir: &Path) -> Result<PathBuf> {
        let data = self.read(id).await?;
        tokio::fs::create_dir_all(output_dir).await?;
        let target = output_dir.join(id.file_stem());
        tokio::fs::write(&target, &data).await?;
        info!("Saved {} ({} bytes) to {}", id, data.len(), target.display());
        Ok(target)
    }
}

fn collect_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let p = entry.path();
        if p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.')) {
            continue;
        }
        if p.is_dir() {
            collect_files(&p, out)?;
        } else if p.is_file() {
            out.push(p);
        } else {
            warn!("Skipping {}: not a regular file", p.display());
        }
    }
    Ok(())
}
