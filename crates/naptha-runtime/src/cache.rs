//! Local cache of recent run ids, persisted as JSON.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use naptha_core::{NodeAddress, Result, RunFailure, RunId, RunRecord, RunStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Entries kept on disk; older ones are dropped on save.
pub const MAX_CACHED_RUNS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRun {
    pub run_id: RunId,
    pub module: String,
    pub node: NodeAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_run_id: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&RunRecord> for CachedRun {
    fn from(r: &RunRecord) -> Self {
        Self {
            run_id: r.id.clone(),
            module: r.request.module.to_string(),
            node: r.node().clone(),
            node_run_id: r.node_run_id.clone(),
            status: r.status,
            failure: r.failure.clone(),
            created_at: r.created_at,
            finished_at: r.finished_at,
        }
    }
}

pub struct RunCache {
    path: PathBuf,
    runs: RwLock<Vec<CachedRun>>,
}

impl RunCache {
    /// Load the cache at `path`. A missing or unreadable file starts empty.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let runs = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!("Ignoring corrupt run cache {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            runs: RwLock::new(runs),
        }
    }

    /// Insert or refresh the entry for `record`.
    pub fn record(&self, record: &RunRecord) {
        let entry = CachedRun::from(record);
        let mut runs = self.runs.write();
        match runs.iter_mut().find(|r| r.run_id == entry.run_id) {
            Some(existing) => *existing = entry,
            None => runs.push(entry),
        }
    }

    pub fn save(&self) -> Result<()> {
        let mut runs = self.runs.write();
        if runs.len() > MAX_CACHED_RUNS {
            let excess = runs.len() - MAX_CACHED_RUNS;
            runs.drain(..excess);
        }
        let data = serde_json::to_string_pretty(&*runs)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    /// Cached runs, oldest first.
    pub fn list(&self) -> Vec<CachedRun> {
        self.runs.read().clone()
    }

    pub fn get(&self, run_id: &RunId) -> Option<CachedRun> {
        self.runs.read().iter().find(|r| &r.run_id == run_id).cloned()
    }
}
