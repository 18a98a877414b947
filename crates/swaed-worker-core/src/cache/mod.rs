//! Response caching for offline use.
//!
//! This module provides the `CacheManager`, which answers intercepted
//! requests with one of three strategies:
//! - Navigations: network-first, falling back to the cached page, then the
//!   offline page
//! - API calls: network-first, falling back to the cached body marked with
//!   `_offline` / `_cachedAt`, then a 503 JSON envelope
//! - Static assets: cache-first, no revalidation
//!
//! Entries live in a single version-named bucket; older buckets are swept
//! on activation.

pub mod manager;
pub mod storage;

pub use manager::{CacheManager, RefreshReport, ResponseSource, Served};
pub use storage::{CacheStorage, CachedResponse, FileCacheStorage, MemoryCacheStorage};
