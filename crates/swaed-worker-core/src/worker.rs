//! Event dispatch for the offline worker.
//!
//! The hosting platform delivers lifecycle, fetch, sync, push and click
//! events; [`ServiceWorker::handle`] routes each one to the owning component
//! and returns its outcome. Awaiting the returned future is what keeps the
//! event alive, so no side-channel completion signal is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheManager, CacheStorage, RefreshReport, Served};
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::http::Request;
use crate::network::Network;
use crate::notify::{ClickOutcome, Notification, NotificationData, NotificationRelay};
use crate::queue::{ActionQueue, DurableStore, FlushOutcome};
use crate::stats::{StatsSnapshot, WorkerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    SkipWaiting,
    GetVersion,
    Unknown(String),
}

impl WorkerMessage {
    /// Accepts `"SKIP_WAITING"` or `{"type": "SKIP_WAITING"}`.
    pub fn from_value(value: &Value) -> Self {
        let kind = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("type").and_then(Value::as_str).unwrap_or(""),
            _ => "",
        };
        match kind {
            "SKIP_WAITING" => WorkerMessage::SkipWaiting,
            "GET_VERSION" => WorkerMessage::GetVersion,
            other => WorkerMessage::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    PeriodicSync { tag: String },
    Push { payload: Option<Vec<u8>> },
    NotificationClick {
        action: Option<String>,
        data: Option<NotificationData>,
    },
    Message(WorkerMessage),
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed { cached: usize },
    Activated { deleted: Vec<String> },
    Fetched(Served),
    Synced(FlushOutcome),
    Refreshed(RefreshReport),
    ShowNotification(Notification),
    NotificationClicked(ClickOutcome),
    Replied(Value),
    /// The event carried nothing this worker handles (unknown tag, message).
    Ignored,
}

pub struct ServiceWorker<N, C, S> {
    config: Arc<WorkerConfig>,
    cache: CacheManager<N, C>,
    queue: ActionQueue<N, S>,
    relay: NotificationRelay,
    stats: Arc<WorkerStats>,
    state: Mutex<LifecycleState>,
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
}

impl<N: Network, C: CacheStorage, S: DurableStore> ServiceWorker<N, C, S> {
    pub fn new(config: WorkerConfig, network: N, cache_storage: C, store: S) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let network = Arc::new(network);
        let stats = Arc::new(WorkerStats::default());

        Ok(Self {
            cache: CacheManager::new(
                config.clone(),
                network.clone(),
                Arc::new(cache_storage),
                stats.clone(),
            ),
            queue: ActionQueue::new(config.clone(), network, Arc::new(store), stats.clone()),
            relay: NotificationRelay::new(config.notifications.clone()),
            config,
            stats,
            state: Mutex::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
            clients_claimed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager<N, C> {
        &self.cache
    }

    pub fn queue(&self) -> &ActionQueue<N, S> {
        &self.queue
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(LifecycleState::Redundant)
    }

    fn set_state(&self, next: LifecycleState) {
        if let Ok(mut state) = self.state.lock() {
            let from = *state;
            debug!(from = ?from, to = ?next, "Lifecycle transition");
            *state = next;
        }
    }

    /// Pick up where an earlier process left off: a worker whose bucket is
    /// already in storage counts as installed.
    pub async fn restore(&self) -> Result<LifecycleState> {
        if self.state() == LifecycleState::Parsed && self.cache.is_installed().await? {
            self.set_state(LifecycleState::Installed);
        }
        Ok(self.state())
    }

    /// Whether the worker asked to activate without waiting for old clients.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Whether the worker took control of already-open pages.
    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    pub async fn handle(&self, event: WorkerEvent) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => self.on_install().await,
            WorkerEvent::Activate => self.on_activate().await,
            WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetched(
                self.cache.handle_fetch(&request).await?,
            )),
            WorkerEvent::Sync { tag } => self.on_sync(&tag).await,
            WorkerEvent::PeriodicSync { tag } => Ok(self.on_periodic_sync(&tag).await),
            WorkerEvent::Push { payload } => Ok(EventOutcome::ShowNotification(
                self.relay.on_push(payload.as_deref()),
            )),
            WorkerEvent::NotificationClick { action, data } => Ok(
                EventOutcome::NotificationClicked(
                    self.relay.on_click(action.as_deref(), data.as_ref()),
                ),
            ),
            WorkerEvent::Message(message) => Ok(self.on_message(message)),
        }
    }

    async fn on_install(&self) -> Result<EventOutcome> {
        self.set_state(LifecycleState::Installing);
        match self.cache.install().await {
            Ok(cached) => {
                self.set_state(LifecycleState::Installed);
                self.skip_waiting.store(true, Ordering::SeqCst);
                info!(bucket = %self.config.bucket_name, cached = cached, "Worker installed");
                Ok(EventOutcome::Installed { cached })
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(LifecycleState::Redundant);
                Err(e)
            }
        }
    }

    async fn on_activate(&self) -> Result<EventOutcome> {
        match self.state() {
            LifecycleState::Installed | LifecycleState::Activated => {}
            other => {
                warn!(state = ?other, "Activate before a successful install");
                return Err(WorkerError::Config(format!(
                    "cannot activate from state {:?}",
                    other
                )));
            }
        }

        self.set_state(LifecycleState::Activating);
        let deleted = match self.cache.activate().await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Activation failed");
                self.set_state(LifecycleState::Installed);
                return Err(e);
            }
        };
        self.set_state(LifecycleState::Activated);
        self.clients_claimed.store(true, Ordering::SeqCst);
        info!(bucket = %self.config.bucket_name, purged = deleted.len(), "Worker activated");
        Ok(EventOutcome::Activated { deleted })
    }

    async fn on_sync(&self, tag: &str) -> Result<EventOutcome> {
        match self.queue.flush_tag(tag).await {
            Some(outcome) => Ok(EventOutcome::Synced(outcome?)),
            None => {
                debug!(tag = tag, "Ignoring unknown sync tag");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    async fn on_periodic_sync(&self, tag: &str) -> EventOutcome {
        if tag != self.config.periodic_sync.tag {
            debug!(tag = tag, "Ignoring unknown periodic sync tag");
            return EventOutcome::Ignored;
        }
        EventOutcome::Refreshed(self.cache.refresh(&self.config.periodic_sync.urls).await)
    }

    fn on_message(&self, message: WorkerMessage) -> EventOutcome {
        match message {
            WorkerMessage::SkipWaiting => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                EventOutcome::Replied(json!({ "ok": true }))
            }
            WorkerMessage::GetVersion => {
                EventOutcome::Replied(json!({ "version": self.config.bucket_name }))
            }
            WorkerMessage::Unknown(kind) => {
                debug!(kind = %kind, "Ignoring unknown message");
                EventOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheStorage, ResponseSource};
    use crate::http::Response;
    use crate::queue::{ActionKind, MemoryStore};
    use crate::testing::ScriptedNetwork;

    type TestWorker = ServiceWorker<ScriptedNetwork, MemoryCacheStorage, MemoryStore>;

    fn worker_with(network: ScriptedNetwork, config: WorkerConfig) -> TestWorker {
        ServiceWorker::new(config, network, MemoryCacheStorage::new(), MemoryStore::new()).unwrap()
    }

    fn online_network() -> ScriptedNetwork {
        let network = ScriptedNetwork::new();
        for url in WorkerConfig::default().static_manifest {
            network.respond(&url, Response::html(200, format!("asset {}", url)));
        }
        network
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let worker = worker_with(online_network(), WorkerConfig::default());
        assert_eq!(worker.state(), LifecycleState::Parsed);

        let outcome = worker.handle(WorkerEvent::Install).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Installed { cached: 6 }));
        assert_eq!(worker.state(), LifecycleState::Installed);
        assert!(worker.skip_waiting_requested());

        let outcome = worker.handle(WorkerEvent::Activate).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Activated { ref deleted } if deleted.is_empty()));
        assert_eq!(worker.state(), LifecycleState::Activated);
        assert!(worker.clients_claimed());
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant_and_cannot_activate() {
        let network = online_network();
        network.respond("/static/css/main.css", Response::new(500, ""));
        let worker = worker_with(network, WorkerConfig::default());

        assert!(matches!(
            worker.handle(WorkerEvent::Install).await,
            Err(WorkerError::Install { .. })
        ));
        assert_eq!(worker.state(), LifecycleState::Redundant);
        assert!(!worker.skip_waiting_requested());
        assert!(worker.handle(WorkerEvent::Activate).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_routes_through_cache_manager() {
        let worker = worker_with(online_network(), WorkerConfig::default());
        worker.handle(WorkerEvent::Install).await.unwrap();

        let outcome = worker
            .handle(WorkerEvent::Fetch(Request::get("/static/css/main.css")))
            .await
            .unwrap();
        match outcome {
            EventOutcome::Fetched(served) => assert_eq!(served.source, ResponseSource::Cache),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sync_event_flushes_matching_queue() {
        let network = ScriptedNetwork::new();
        network.respond("/api/volunteer/checkout", Response::new(200, "{}"));
        let worker = worker_with(network, WorkerConfig::default());
        worker
            .queue()
            .enqueue(ActionKind::CheckOut, serde_json::json!({"eventId": 1}))
            .await
            .unwrap();

        let outcome = worker
            .handle(WorkerEvent::Sync { tag: "volunteer-checkout".into() })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::Synced(FlushOutcome::Flushed { sent: 1, .. })
        ));

        let outcome = worker
            .handle(WorkerEvent::Sync { tag: "sync-everything".into() })
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_periodic_sync_only_for_configured_tag() {
        let network = ScriptedNetwork::new();
        network.respond("/api/volunteer/profile", Response::new(200, "{}"));
        network.respond("/api/opportunities", Response::new(200, "[]"));
        let worker = worker_with(network, WorkerConfig::default());

        let outcome = worker
            .handle(WorkerEvent::PeriodicSync { tag: "update-volunteer-data".into() })
            .await
            .unwrap();
        match outcome {
            EventOutcome::Refreshed(report) => {
                assert_eq!(report.refreshed.len(), 2);
                assert!(report.failed.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome = worker
            .handle(WorkerEvent::PeriodicSync { tag: "content-sync".into() })
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_push_and_click() {
        let worker = worker_with(ScriptedNetwork::new(), WorkerConfig::default());
        let outcome = worker
            .handle(WorkerEvent::Push {
                payload: Some(br#"{"title":"X","body":"Y","url":"/z"}"#.to_vec()),
            })
            .await
            .unwrap();
        let notification = match outcome {
            EventOutcome::ShowNotification(n) => n,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let outcome = worker
            .handle(WorkerEvent::NotificationClick {
                action: Some("view".into()),
                data: Some(notification.data),
            })
            .await
            .unwrap();
        match outcome {
            EventOutcome::NotificationClicked(click) => {
                assert_eq!(click.open_url.as_deref(), Some("/z"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_messages() {
        let config = WorkerConfig {
            bucket_name: "swaed-uae-v7".into(),
            ..WorkerConfig::default()
        };
        let worker = worker_with(ScriptedNetwork::new(), config);

        let msg = WorkerMessage::from_value(&serde_json::json!({"type": "GET_VERSION"}));
        match worker.handle(WorkerEvent::Message(msg)).await.unwrap() {
            EventOutcome::Replied(v) => assert_eq!(v["version"], "swaed-uae-v7"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let msg = WorkerMessage::from_value(&serde_json::json!("SKIP_WAITING"));
        worker.handle(WorkerEvent::Message(msg)).await.unwrap();
        assert!(worker.skip_waiting_requested());

        let msg = WorkerMessage::from_value(&serde_json::json!({"type": "PING"}));
        assert!(matches!(
            worker.handle(WorkerEvent::Message(msg)).await.unwrap(),
            EventOutcome::Ignored
        ));
    }

    #[tokio::test]
    async fn test_restore_from_existing_bucket() {
        let storage = MemoryCacheStorage::new();
        storage.open("swaed-uae-v1").await.unwrap();
        storage.open("swaed-uae-v0").await.unwrap();
        let worker = ServiceWorker::new(
            WorkerConfig::default(),
            ScriptedNetwork::new(),
            storage,
            MemoryStore::new(),
        )
        .unwrap();

        assert_eq!(worker.restore().await.unwrap(), LifecycleState::Installed);
        let outcome = worker.handle(WorkerEvent::Activate).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Activated { ref deleted } if deleted == &["swaed-uae-v0"]));
    }

    #[tokio::test]
    async fn test_restore_without_bucket_stays_parsed() {
        let worker = worker_with(ScriptedNetwork::new(), WorkerConfig::default());
        assert_eq!(worker.restore().await.unwrap(), LifecycleState::Parsed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WorkerConfig {
            bucket_name: " ".into(),
            ..WorkerConfig::default()
        };
        assert!(ServiceWorker::new(
            config,
            ScriptedNetwork::new(),
            MemoryCacheStorage::new(),
            MemoryStore::new()
        )
        .is_err());
    }
}
