//! In-memory RunRecord store owned by one dispatcher.

use std::collections::HashMap;

use naptha_core::{Error, Result, RunId, RunRecord};
use parking_lot::RwLock;

#[derive(Default)]
pub struct RunStore {
    records: RwLock<HashMap<RunId, RunRecord>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: RunRecord) -> RunId {
        let id = record.id.clone();
        self.records.write().insert(id.clone(), record);
        id
    }

    pub fn get(&self, id: &RunId) -> Option<RunRecord> {
        self.records.read().get(id).cloned()
    }

    /// Mutate a record in place under the write lock.
    pub fn update<R>(&self, id: &RunId, f: impl FnOnce(&mut RunRecord) -> R) -> Result<R> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("run {}", id)))?;
        Ok(f(record))
    }

    /// Read from a record without cloning it.
    pub fn with<R>(&self, id: &RunId, f: impl FnOnce(&RunRecord) -> R) -> Result<R> {
        let records = self.records.read();
        let record = records
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("run {}", id)))?;
        Ok(f(record))
    }

    pub fn remove(&self, id: &RunId) -> Option<RunRecord> {
        self.records.write().remove(id)
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let mut all: Vec<RunRecord> = self.records.read().values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
