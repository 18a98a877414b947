// Durable key-value store for pending actions.
// Each key holds one ordered list. Appends and front-removals happen under
// the store's lock, so a page appending while a flush is in flight is never
// overwritten by the flush's cleanup.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, WorkerError};

use super::pending::{PendingAction, PendingRecord};

pub trait DurableStore: Send + Sync {
    /// Snapshot of the list under `key` (empty if absent).
    fn load(&self, key: &str) -> impl Future<Output = Result<Vec<PendingAction>>> + Send;

    /// Append to the list under `key`, returning its new length.
    fn append(
        &self,
        key: &str,
        action: PendingAction,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Remove the first `count` entries, returning how many remain.
    fn remove_front(&self, key: &str, count: usize) -> impl Future<Output = Result<usize>> + Send;

    /// Drop the whole list under `key`.
    fn clear(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> WorkerError {
    WorkerError::Storage("durable store lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, PendingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Vec<PendingAction>> {
        let records = self.records.lock().map_err(lock_err)?;
        Ok(records.get(key).map(|r| r.data.clone()).unwrap_or_default())
    }

    async fn append(&self, key: &str, action: PendingAction) -> Result<usize> {
        let mut records = self.records.lock().map_err(lock_err)?;
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| PendingRecord::empty(key));
        record.data.push(action);
        Ok(record.data.len())
    }

    async fn remove_front(&self, key: &str, count: usize) -> Result<usize> {
        let mut records = self.records.lock().map_err(lock_err)?;
        match records.get_mut(key) {
            Some(record) => {
                let n = count.min(record.data.len());
                record.data.drain(..n);
                Ok(record.data.len())
            }
            None => Ok(0),
        }
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(lock_err)?;
        records.remove(key);
        Ok(())
    }
}

/// JSON-file store: `<dir>/<key>.json` holding a [`PendingRecord`].
pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(WorkerError::Storage(format!("invalid store key: {}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    fn read(&self, key: &str) -> Result<PendingRecord> {
        let path = self.record_path(key)?;
        if !path.exists() {
            return Ok(PendingRecord::empty(key));
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| WorkerError::Storage(format!("failed to read {}: {}", key, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| WorkerError::Storage(format!("failed to parse {}: {}", key, e)))
    }

    fn write(&self, record: &PendingRecord) -> Result<()> {
        let path = self.record_path(&record.key)?;
        let contents = serde_json::to_string_pretty(record)?;

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    async fn load(&self, key: &str) -> Result<Vec<PendingAction>> {
        let _guard = self.lock.lock().map_err(lock_err)?;
        Ok(self.read(key)?.data)
    }

    async fn append(&self, key: &str, action: PendingAction) -> Result<usize> {
        let _guard = self.lock.lock().map_err(lock_err)?;
        let mut record = self.read(key)?;
        record.data.push(action);
        self.write(&record)?;
        debug!(key = key, pending = record.data.len(), "Appended pending action");
        Ok(record.data.len())
    }

    async fn remove_front(&self, key: &str, count: usize) -> Result<usize> {
        let _guard = self.lock.lock().map_err(lock_err)?;
        let mut record = self.read(key)?;
        let n = count.min(record.data.len());
        record.data.drain(..n);
        self.write(&record)?;
        Ok(record.data.len())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(lock_err)?;
        let path = self.record_path(key)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
