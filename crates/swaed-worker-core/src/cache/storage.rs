// Bucket storage: named buckets of URL -> response entries.
// An in-memory backend for embedding and tests, and a JSON-file backend
// with one directory per bucket and one file per entry.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, WorkerError};
use crate::http::Response;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }
}

pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if it does not exist.
    fn open(&self, bucket: &str) -> impl Future<Output = Result<()>> + Send;

    /// Names of every bucket that currently exists.
    fn bucket_names(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Delete a bucket and all its entries. Returns false if it did not exist.
    fn delete_bucket(&self, bucket: &str) -> impl Future<Output = Result<bool>> + Send;

    fn lookup(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<CachedResponse>>> + Send;

    /// Store an entry, overwriting any previous entry for the same key.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        response: &Response,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Store several entries; either all land or none do.
    fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(String, Response)>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn keys(&self, bucket: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> WorkerError {
    WorkerError::Storage("cache storage lock poisoned".into())
}

type Bucket = HashMap<String, CachedResponse>;

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().map_err(lock_err)?;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().map_err(lock_err)?;
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        let mut buckets = self.buckets.lock().map_err(lock_err)?;
        Ok(buckets.remove(bucket).is_some())
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        let buckets = self.buckets.lock().map_err(lock_err)?;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, response: &Response) -> Result<()> {
        let mut buckets = self.buckets.lock().map_err(lock_err)?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), CachedResponse::new(response.clone()));
        Ok(())
    }

    async fn put_all(&self, bucket: &str, entries: Vec<(String, Response)>) -> Result<()> {
        let mut buckets = self.buckets.lock().map_err(lock_err)?;
        let target = buckets.entry(bucket.to_string()).or_default();
        for (key, response) in entries {
            target.insert(key, CachedResponse::new(response));
        }
        Ok(())
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().map_err(lock_err)?;
        let mut keys: Vec<String> = buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

/// On-disk entry: the original key is kept alongside the response since
/// file names are hashes.
#[derive(Debug, Serialize, Deserialize)]
struct EntryFile {
    key: String,
    #[serde(flatten)]
    cached: CachedResponse,
}

/// JSON-file backend. Layout: `<root>/<bucket>/<sha256(key)>.json`.
pub struct FileCacheStorage {
    root: PathBuf,
    // Serializes writers so put_all can stage and commit without interleaving.
    write_lock: Mutex<()>,
}

impl FileCacheStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(WorkerError::Storage(format!("invalid bucket name: {}", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn entry_file_name(key: &str) -> String {
        format!("{}.json", hex::encode(Sha256::digest(key.as_bytes())))
    }

    fn write_entry(dir: &Path, key: &str, response: &Response) -> Result<()> {
        let entry = EntryFile {
            key: key.to_string(),
            cached: CachedResponse::new(response.clone()),
        };
        let contents = serde_json::to_string_pretty(&entry)?;
        let path = dir.join(Self::entry_file_name(key));

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Move staged files into the bucket. Replaced entries are parked in
    /// `backup` first, so a failed rename puts every touched entry back.
    fn commit_staged(staging: &Path, dir: &Path, backup: &Path, names: &[String]) -> Result<()> {
        if backup.exists() {
            std::fs::remove_dir_all(backup)?;
        }
        std::fs::create_dir_all(backup)?;

        let mut touched: Vec<&str> = Vec::new();
        let result = names.iter().try_for_each(|name| -> Result<()> {
            let target = dir.join(name);
            if target.exists() {
                std::fs::rename(&target, backup.join(name))?;
            }
            touched.push(name);
            std::fs::rename(staging.join(name), &target)?;
            Ok(())
        });

        if let Err(e) = result {
            for name in touched.into_iter().rev() {
                let target = dir.join(name);
                let parked = backup.join(name);
                let restored = if parked.exists() {
                    std::fs::rename(&parked, &target)
                } else if target.exists() {
                    std::fs::remove_file(&target)
                } else {
                    Ok(())
                };
                if let Err(undo) = restored {
                    warn!(entry = name, error = %undo, "Could not roll back cache entry");
                }
            }
            return Err(WorkerError::Storage(format!("bucket commit failed: {}", e)));
        }
        Ok(())
    }

    fn read_entry(path: &Path) -> Result<EntryFile> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl CacheStorage for FileCacheStorage {
    async fn open(&self, bucket: &str) -> Result<()> {
        std::fs::create_dir_all(self.bucket_dir(bucket)?)?;
        Ok(())
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket)?;
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        debug!(bucket = bucket, "Deleted cache bucket");
        Ok(true)
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        let path = self.bucket_dir(bucket)?.join(Self::entry_file_name(key));
        if !path.exists() {
            return Ok(None);
        }
        let entry = Self::read_entry(&path)?;
        Ok(Some(entry.cached))
    }

    async fn put(&self, bucket: &str, key: &str, response: &Response) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        std::fs::create_dir_all(&dir)?;
        Self::write_entry(&dir, key, response).map_err(|e| WorkerError::CacheWrite {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn put_all(&self, bucket: &str, entries: Vec<(String, Response)>) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        std::fs::create_dir_all(&dir)?;

        // Stage every entry first so a failure leaves the bucket untouched.
        let staging = self.root.join(format!(".staging-{}", bucket));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;
        let staged: Result<()> = entries
            .iter()
            .try_for_each(|(key, response)| Self::write_entry(&staging, key, response));
        if let Err(e) = staged {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        let mut names: Vec<String> = entries
            .iter()
            .map(|(key, _)| Self::entry_file_name(key))
            .collect();
        names.sort();
        names.dedup();

        let backup = self.root.join(format!(".backup-{}", bucket));
        let committed = Self::commit_staged(&staging, &dir, &backup, &names);
        let _ = std::fs::remove_dir_all(&staging);
        let _ = std::fs::remove_dir_all(&backup);
        committed
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                keys.push(Self::read_entry(&path)?.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
