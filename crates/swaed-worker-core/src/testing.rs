//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheStorage, CachedResponse, MemoryCacheStorage};
use crate::error::{Result, WorkerError};
use crate::http::{Request, Response};
use crate::network::Network;

/// Network answering from a per-URL script and recording every request.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Response>>,
    // Consumed before `routes`; `None` is a transport failure.
    sequences: Mutex<HashMap<String, VecDeque<Option<Response>>>>,
    offline: AtomicBool,
    log: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn respond_sequence(&self, url: &str, outcomes: Vec<Option<Response>>) {
        self.sequences
            .lock()
            .unwrap()
            .insert(url.to_string(), outcomes.into_iter().collect());
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.url == url).count()
    }
}

impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.log.lock().unwrap().push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(WorkerError::Network("offline".into()));
        }

        let scripted = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(Some(response)) => return Ok(response),
            Some(None) => {
                return Err(WorkerError::Network(format!("connection reset: {}", request.url)))
            }
            None => {}
        }

        self.routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| WorkerError::Network(format!("no route to {}", request.url)))
    }
}

/// Bucket storage whose writes always fail.
#[derive(Default)]
pub struct FailingPutStorage {
    inner: MemoryCacheStorage,
}

impl CacheStorage for FailingPutStorage {
    async fn open(&self, bucket: &str) -> Result<()> {
        self.inner.open(bucket).await
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        self.inner.bucket_names().await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        self.inner.delete_bucket(bucket).await
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        self.inner.lookup(bucket, key).await
    }

    async fn put(&self, _bucket: &str, key: &str, _response: &Response) -> Result<()> {
        Err(WorkerError::CacheWrite {
            key: key.to_string(),
            reason: "quota exceeded".into(),
        })
    }

    async fn put_all(&self, bucket: &str, _entries: Vec<(String, Response)>) -> Result<()> {
        Err(WorkerError::CacheWrite {
            key: bucket.to_string(),
            reason: "quota exceeded".into(),
        })
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        self.inner.keys(bucket).await
    }
}
