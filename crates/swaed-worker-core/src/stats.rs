use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for outcomes that never reach the page directly.
#[derive(Debug, Default)]
pub struct WorkerStats {
    cache_hits: AtomicU64,
    cache_writes: AtomicU64,
    cache_write_failures: AtomicU64,
    offline_responses: AtomicU64,
    actions_replayed: AtomicU64,
    actions_rejected: AtomicU64,
    flushes_abandoned: AtomicU64,
    refresh_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_writes: u64,
    pub cache_write_failures: u64,
    pub offline_responses: u64,
    pub actions_replayed: u64,
    pub actions_rejected: u64,
    pub flushes_abandoned: u64,
    pub refresh_failures: u64,
}

impl WorkerStats {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write(&self) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write_failure(&self) {
        self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale-marked, fallback-page or synthesized reply served offline.
    pub fn record_offline_response(&self) {
        self.offline_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_replayed(&self) {
        self.actions_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_rejected(&self) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_abandoned(&self) {
        self.flushes_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
            offline_responses: self.offline_responses.load(Ordering::Relaxed),
            actions_replayed: self.actions_replayed.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            flushes_abandoned: self.flushes_abandoned.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }
}
