//! Core library for the SwaedUAE offline worker.
//!
//! This crate decides what to cache, when to answer from the cache instead
//! of the network, how to queue writes made while offline, and how to replay
//! them once connectivity returns. It is host-agnostic: the network, the
//! cache buckets and the durable store are traits, with HTTP and JSON-file
//! implementations for running outside a browser.
//!
//! - `cache`: cache-first / network-first strategies and bucket storage
//! - `queue`: per-kind offline action queue and its durable store
//! - `notify`: push notification display and click routing
//! - `worker`: event dispatch and lifecycle state

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod network;
pub mod notify;
pub mod queue;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{CacheManager, FileCacheStorage, MemoryCacheStorage, ResponseSource, Served};
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use http::{Destination, Method, Request, RequestMode, Response};
pub use network::{HttpNetwork, Network};
pub use notify::{Notification, NotificationData, NotificationRelay, PushPayload};
pub use queue::{ActionKind, ActionQueue, FileStore, FlushOutcome, MemoryStore, PendingAction};
pub use stats::StatsSnapshot;
pub use worker::{EventOutcome, LifecycleState, ServiceWorker, WorkerEvent, WorkerMessage};
