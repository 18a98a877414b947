use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::http::{cache_key_for, Destination, Method, Request, RequestMode, Response};
use crate::network::Network;
use crate::stats::WorkerStats;

use super::storage::CacheStorage;

/// Header marking a response rebuilt from the cache while offline.
pub const SERVED_BY_HEADER: &str = "x-served-by";
pub const SERVED_BY_VALUE: &str = "ServiceWorker-Cache";

pub const OFFLINE_MESSAGE: &str = "This feature requires an internet connection";

/// Served when the network is down and the offline page never made it into
/// the bucket.
const FALLBACK_OFFLINE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>Offline</title></head><body><h1>You are offline</h1>\
<p>Please check your internet connection and try again.</p></body></html>";

/// Where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached API body re-issued with `_offline` / `_cachedAt` markers
    StaleCache,
    OfflinePage,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: Response,
    pub source: ResponseSource,
}

impl Served {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// Decides, per request, whether to answer from the bucket, the network,
/// or a marked/synthesized response, and keeps the bucket populated.
pub struct CacheManager<N, C> {
    config: Arc<WorkerConfig>,
    network: Arc<N>,
    storage: Arc<C>,
    stats: Arc<WorkerStats>,
}

impl<N: Network, C: CacheStorage> CacheManager<N, C> {
    pub fn new(
        config: Arc<WorkerConfig>,
        network: Arc<N>,
        storage: Arc<C>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            config,
            network,
            storage,
            stats,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    // ===== Lifecycle =====

    /// Fetch the whole static manifest into the current bucket. Nothing is
    /// stored unless every URL came back with a success status.
    pub async fn install(&self) -> Result<usize> {
        let bucket = self.bucket();
        self.storage.open(bucket).await?;

        let fetches = self.config.static_manifest.iter().map(|url| async move {
            let request = Request::get(url.as_str());
            let response = self.network.fetch(&request).await.map_err(|e| {
                WorkerError::Install {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !response.is_success() {
                return Err(WorkerError::Install {
                    url: url.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok((request.cache_key(), response))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.storage
            .put_all(bucket, entries)
            .await
            .map_err(|e| WorkerError::Install {
                url: bucket.to_string(),
                reason: e.to_string(),
            })?;

        info!(bucket = bucket, entries = count, "Static assets cached");
        Ok(count)
    }

    /// Delete every bucket except the current one. Returns the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.bucket();
        let mut deleted = Vec::new();
        for name in self.storage.bucket_names().await? {
            if name != current {
                info!(bucket = %name, "Deleting stale cache bucket");
                if self.storage.delete_bucket(&name).await? {
                    deleted.push(name);
                }
            }
        }
        Ok(deleted)
    }

    /// True once the current bucket exists in storage.
    pub async fn is_installed(&self) -> Result<bool> {
        let current = self.bucket();
        Ok(self.bucket_names().await?.iter().any(|name| name == current))
    }

    pub async fn bucket_names(&self) -> Result<Vec<String>> {
        self.storage.bucket_names().await
    }

    /// Number of entries in the current bucket.
    pub async fn entry_count(&self) -> Result<usize> {
        Ok(self.storage.keys(self.bucket()).await?.len())
    }

    // ===== Fetch interception =====

    pub async fn handle_fetch(&self, request: &Request) -> Result<Served> {
        if request.mode == RequestMode::Navigate {
            Ok(self.network_first_navigation(request).await)
        } else if self.config.is_api_path(&request.path()) {
            self.network_first_api(request).await
        } else {
            self.cache_first(request).await
        }
    }

    async fn network_first_navigation(&self, request: &Request) -> Served {
        match self.network.fetch(request).await {
            Ok(response) => {
                if request.method == Method::Get && response.is_ok() {
                    self.store(&request.cache_key(), &response).await;
                }
                Served::new(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, method = %request.method, error = %e, "Navigation failed");
                if request.method == Method::Get {
                    if let Some(cached) = self.lookup(&request.cache_key()).await {
                        self.stats.record_cache_hit();
                        return Served::new(cached, ResponseSource::Cache);
                    }
                }
                self.offline_page().await
            }
        }
    }

    async fn network_first_api(&self, request: &Request) -> Result<Served> {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                if request.method == Method::Get && response.is_ok() {
                    self.store(&request.cache_key(), &response).await;
                }
                return Ok(Served::new(response, ResponseSource::Network));
            }
            Err(e) => e,
        };

        // Writes are never cached, so only reads can be answered from the bucket.
        if request.method == Method::Get {
            if let Some(cached) = self.lookup(&request.cache_key()).await {
                match mark_offline(&cached) {
                    Ok(response) => {
                        debug!(url = %request.url, error = %error, "Serving API response from cache");
                        self.stats.record_cache_hit();
                        self.stats.record_offline_response();
                        return Ok(Served::new(response, ResponseSource::StaleCache));
                    }
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Cached API body is not JSON");
                    }
                }
            }
        }

        debug!(url = %request.url, method = %request.method, error = %error, "API unavailable offline");
        self.stats.record_offline_response();
        Ok(Served::new(offline_api_response()?, ResponseSource::Synthesized))
    }

    /// Only GETs are looked up or stored; other methods always go to the network.
    async fn cache_first(&self, request: &Request) -> Result<Served> {
        let cacheable = request.method == Method::Get;
        if cacheable {
            if let Some(cached) = self.lookup(&request.cache_key()).await {
                self.stats.record_cache_hit();
                return Ok(Served::new(cached, ResponseSource::Cache));
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if cacheable && response.is_ok() && request.destination.is_static_asset() {
                    self.store(&request.cache_key(), &response).await;
                }
                Ok(Served::new(response, ResponseSource::Network))
            }
            Err(e) if request.destination == Destination::Document => {
                debug!(url = %request.url, error = %e, "Document fetch failed, serving offline page");
                Ok(self.offline_page().await)
            }
            Err(e) => Err(e),
        }
    }

    // ===== Periodic refresh =====

    /// Re-fetch read endpoints and overwrite their entries on success.
    /// Failures are logged and reported, never retried here.
    pub async fn refresh(&self, urls: &[String]) -> RefreshReport {
        let mut report = RefreshReport {
            refreshed: Vec::new(),
            failed: Vec::new(),
        };
        for url in urls {
            let request = Request::get(url.as_str());
            match self.network.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    self.store(&request.cache_key(), &response).await;
                    report.refreshed.push(url.clone());
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "Periodic refresh got non-OK status");
                    self.stats.record_refresh_failure();
                    report.failed.push(url.clone());
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Periodic refresh failed");
                    self.stats.record_refresh_failure();
                    report.failed.push(url.clone());
                }
            }
        }
        report
    }

    // ===== Bucket access =====

    /// Store a response. Failures are logged and counted, never returned:
    /// the response on its way to the page must not depend on the cache.
    async fn store(&self, key: &str, response: &Response) {
        match self.storage.put(self.bucket(), key, response).await {
            Ok(()) => {
                self.stats.record_cache_write();
                debug!(key = key, "Cached response");
            }
            Err(e) => {
                self.stats.record_cache_write_failure();
                warn!(key = key, error = %e, "Cache write failed");
            }
        }
    }

    /// Look up a key in the current bucket; read errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<Response> {
        match self.storage.lookup(self.bucket(), key).await {
            Ok(found) => found.map(|c| c.response),
            Err(e) => {
                warn!(key = key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn offline_page(&self) -> Served {
        self.stats.record_offline_response();
        let key = cache_key_for(&self.config.offline_page);
        match self.lookup(&key).await {
            Some(page) => Served::new(page, ResponseSource::OfflinePage),
            None => {
                warn!(page = %self.config.offline_page, "Offline page missing from cache");
                Served::new(
                    Response::html(503, FALLBACK_OFFLINE_HTML),
                    ResponseSource::Synthesized,
                )
            }
        }
    }
}

/// Rebuild a cached API response with the offline markers injected.
/// The stored bytes are left untouched.
fn mark_offline(cached: &Response) -> Result<Response> {
    let value: Value = serde_json::from_slice(&cached.body)?;
    let mut body = match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    body.insert("_offline".to_string(), Value::Bool(true));
    body.insert(
        "_cachedAt".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Ok(Response::json(200, &body)?.with_header(SERVED_BY_HEADER, SERVED_BY_VALUE))
}

fn offline_api_response() -> Result<Response> {
    Response::json(
        503,
        &json!({
            "error": "Offline",
            "message": OFFLINE_MESSAGE,
            "_offline": true,
        }),
    )
}
