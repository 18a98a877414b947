use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{PendingKindConfig, WorkerConfig};
use crate::error::{Result, WorkerError};
use crate::http::Request;
use crate::network::Network;
use crate::stats::WorkerStats;

use super::pending::{ActionKind, PendingAction};
use super::store::DurableStore;

/// Header carrying [`PendingAction::id`] on replayed requests.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// Every queued action was delivered and removed.
    Flushed { sent: usize, rejected: usize },
    /// A send failed; nothing was removed and the rest were not attempted.
    Abandoned { sent: usize, error: String },
    /// Another flush of the same kind is still running.
    AlreadyFlushing,
}

/// Marks a kind as flushing for as long as it lives.
struct FlushGuard<'a> {
    flushing: &'a Mutex<HashSet<ActionKind>>,
    kind: ActionKind,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.flushing.lock() {
            set.remove(&self.kind);
        }
    }
}

/// Typed per-kind log of writes made offline, replayed in order on sync.
pub struct ActionQueue<N, S> {
    config: Arc<WorkerConfig>,
    network: Arc<N>,
    store: Arc<S>,
    stats: Arc<WorkerStats>,
    flushing: Mutex<HashSet<ActionKind>>,
}

impl<N: Network, S: DurableStore> ActionQueue<N, S> {
    pub fn new(
        config: Arc<WorkerConfig>,
        network: Arc<N>,
        store: Arc<S>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            config,
            network,
            store,
            stats,
            flushing: Mutex::new(HashSet::new()),
        }
    }

    fn kind_config(&self, kind: ActionKind) -> Result<&PendingKindConfig> {
        self.config
            .kind_config(kind)
            .ok_or_else(|| WorkerError::Config(format!("no queue configured for {}", kind)))
    }

    /// Append a payload to the kind's list. This is the page-side half of
    /// the contract; the page then asks the platform for a sync.
    pub async fn enqueue(&self, kind: ActionKind, payload: Value) -> Result<PendingAction> {
        let key = &self.kind_config(kind)?.storage_key;
        let action = PendingAction::new(kind, payload);
        let pending = self.store.append(key, action.clone()).await?;
        debug!(kind = %kind, pending = pending, "Queued offline action");
        Ok(action)
    }

    /// Snapshot of everything queued for a kind, in insertion order.
    pub async fn drain_all(&self, kind: ActionKind) -> Result<Vec<PendingAction>> {
        let key = &self.kind_config(kind)?.storage_key;
        self.store.load(key).await
    }

    pub async fn clear(&self, kind: ActionKind) -> Result<()> {
        let key = &self.kind_config(kind)?.storage_key;
        self.store.clear(key).await
    }

    /// Remove the first `count` actions once they are known delivered.
    pub async fn acknowledge(&self, kind: ActionKind, count: usize) -> Result<usize> {
        let key = &self.kind_config(kind)?.storage_key;
        self.store.remove_front(key, count).await
    }

    pub async fn pending_count(&self, kind: ActionKind) -> Result<usize> {
        Ok(self.drain_all(kind).await?.len())
    }

    /// Flush the kind whose sync tag matches exactly. Unknown tags yield `None`.
    pub async fn flush_tag(&self, tag: &str) -> Option<Result<FlushOutcome>> {
        let kind = self.config.kind_for_tag(tag)?.kind;
        Some(self.flush(kind).await)
    }

    /// Replay every queued action of a kind, one at a time, in order.
    ///
    /// Delivery is at-least-once: if a later send fails, earlier ones stay
    /// queued and are sent again next time. Items appended while the flush
    /// runs are left in place.
    ///
    /// A 2xx reply counts as delivered and a 4xx as a permanent rejection
    /// (dropped, counted). A 5xx reply abandons the flush just like a
    /// transport error, even though the request itself completed.
    pub async fn flush(&self, kind: ActionKind) -> Result<FlushOutcome> {
        let _guard = {
            let mut set = self
                .flushing
                .lock()
                .map_err(|_| WorkerError::Storage("flush state lock poisoned".into()))?;
            if !set.insert(kind) {
                debug!(kind = %kind, "Flush already in progress");
                return Ok(FlushOutcome::AlreadyFlushing);
            }
            FlushGuard {
                flushing: &self.flushing,
                kind,
            }
        };

        let endpoint = self.kind_config(kind)?.endpoint.clone();
        let actions = self.drain_all(kind).await?;
        if actions.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        info!(kind = %kind, count = actions.len(), "Replaying queued actions");
        let mut sent = 0;
        let mut rejected = 0;
        for action in &actions {
            match self.send(&endpoint, action).await {
                Ok(Delivery::Accepted) => {
                    sent += 1;
                    self.stats.record_action_replayed();
                }
                Ok(Delivery::Rejected { status, body }) => {
                    warn!(kind = %kind, id = %action.id, status = status, body = %body, "Server rejected queued action, dropping it");
                    sent += 1;
                    rejected += 1;
                    self.stats.record_action_rejected();
                }
                Err(e) => {
                    if e.is_network() {
                        info!(kind = %kind, sent = sent, error = %e, "Still offline, keeping queue for next sync");
                    } else {
                        warn!(kind = %kind, sent = sent, error = %e, "Replay failed, keeping queue for next sync");
                    }
                    self.stats.record_flush_abandoned();
                    return Ok(FlushOutcome::Abandoned {
                        sent,
                        error: e.to_string(),
                    });
                }
            }
        }

        let remaining = self.acknowledge(kind, actions.len()).await?;
        info!(kind = %kind, sent = sent, remaining = remaining, "Queue flushed");
        Ok(FlushOutcome::Flushed { sent, rejected })
    }

    async fn send(&self, endpoint: &str, action: &PendingAction) -> Result<Delivery> {
        let request = Request::post_json(endpoint, &action.payload)?
            .with_header(IDEMPOTENCY_HEADER, action.id.as_str());
        let response = self.network.fetch(&request).await?;
        if response.is_success() {
            Ok(Delivery::Accepted)
        } else if (400..500).contains(&response.status) {
            Ok(Delivery::Rejected {
                status: response.status,
                body: WorkerError::truncate_body(&response.text()),
            })
        } else {
            Err(WorkerError::HttpStatus {
                status: response.status,
                url: endpoint.to_string(),
                body: WorkerError::truncate_body(&response.text()),
            })
        }
    }
}

enum Delivery {
    Accepted,
    Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Response};
    use crate::queue::MemoryStore;
    use crate::testing::ScriptedNetwork;
    use serde_json::json;

    fn queue(
        network: Arc<ScriptedNetwork>,
    ) -> (ActionQueue<ScriptedNetwork, MemoryStore>, Arc<WorkerStats>) {
        let stats = Arc::new(WorkerStats::default());
        let q = ActionQueue::new(
            Arc::new(WorkerConfig::default()),
            network,
            Arc::new(MemoryStore::new()),
            stats.clone(),
        );
        (q, stats)
    }

    async fn enqueue_three(q: &ActionQueue<ScriptedNetwork, MemoryStore>) {
        for n in 1..=3 {
            q.enqueue(ActionKind::CheckIn, json!({ "eventId": n })).await.unwrap();
        }
    }

    fn ok() -> Response {
        Response::json(200, &json!({"ok": true})).unwrap()
    }

    #[tokio::test]
    async fn test_flush_sends_in_order_and_empties_queue() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/api/volunteer/checkin", ok());
        let (q, stats) = queue(network.clone());
        enqueue_three(&q).await;

        let outcome = q.flush_tag("volunteer-checkin").await.unwrap().unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { sent: 3, rejected: 0 });

        let requests = network.requests();
        assert_eq!(requests.len(), 3);
        for (i, req) in requests.iter().enumerate() {
            assert_eq!(req.method, Method::Post);
            assert_eq!(req.url, "/api/volunteer/checkin");
            let body: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
            assert_eq!(body, json!({ "eventId": i as i64 + 1 }));
            assert!(req.header(IDEMPOTENCY_HEADER).is_some());
        }
        assert_eq!(q.pending_count(ActionKind::CheckIn).await.unwrap(), 0);
        assert_eq!(stats.snapshot().actions_replayed, 3);
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_every_item() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond_sequence("/api/volunteer/checkin", vec![Some(ok()), None, Some(ok())]);
        let (q, stats) = queue(network.clone());
        enqueue_three(&q).await;
        let before = q.drain_all(ActionKind::CheckIn).await.unwrap();

        let outcome = q.flush(ActionKind::CheckIn).await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Abandoned { sent: 1, .. }));

        // Third item never attempted, all three still queued.
        assert_eq!(network.requests_to("/api/volunteer/checkin"), 2);
        assert_eq!(q.drain_all(ActionKind::CheckIn).await.unwrap(), before);
        assert_eq!(stats.snapshot().flushes_abandoned, 1);
    }

    #[tokio::test]
    async fn test_retry_redelivers_already_sent_items() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond_sequence("/api/volunteer/checkin", vec![Some(ok()), None]);
        network.respond("/api/volunteer/checkin", ok());
        let (q, _) = queue(network.clone());
        enqueue_three(&q).await;

        q.flush(ActionKind::CheckIn).await.unwrap();
        let outcome = q.flush(ActionKind::CheckIn).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { sent: 3, rejected: 0 });

        // First item went out twice with the same idempotency key.
        let requests = network.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(
            requests[0].header(IDEMPOTENCY_HEADER),
            requests[2].header(IDEMPOTENCY_HEADER)
        );
    }

    #[tokio::test]
    async fn test_server_error_abandons_but_client_error_drops() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond_sequence(
            "/api/events/register",
            vec![
                Some(Response::new(422, "event is full")),
                Some(Response::new(503, "down for maintenance")),
            ],
        );
        let (q, stats) = queue(network.clone());
        q.enqueue(ActionKind::EventRegistration, json!({"eventId": 1})).await.unwrap();
        q.enqueue(ActionKind::EventRegistration, json!({"eventId": 2})).await.unwrap();

        let outcome = q.flush(ActionKind::EventRegistration).await.unwrap();
        match outcome {
            FlushOutcome::Abandoned { sent, error } => {
                assert_eq!(sent, 1);
                assert!(error.contains("503"));
                assert!(error.contains("down for maintenance"));
            }
            other => panic!("expected abandoned flush, got {:?}", other),
        }
        assert_eq!(q.pending_count(ActionKind::EventRegistration).await.unwrap(), 2);
        assert_eq!(stats.snapshot().actions_rejected, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let network = Arc::new(ScriptedNetwork::new());
        let (q, _) = queue(network.clone());
        assert_eq!(q.flush(ActionKind::CheckOut).await.unwrap(), FlushOutcome::Empty);
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tag_ignored() {
        let network = Arc::new(ScriptedNetwork::new());
        let (q, _) = queue(network);
        enqueue_three(&q).await;
        assert!(q.flush_tag("volunteer-checkin-v2").await.is_none());
        assert!(q.flush_tag("").await.is_none());
        assert_eq!(q.pending_count(ActionKind::CheckIn).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/api/volunteer/checkout", ok());
        let (q, _) = queue(network.clone());
        enqueue_three(&q).await;
        q.enqueue(ActionKind::CheckOut, json!({"eventId": 9})).await.unwrap();

        let outcome = q.flush_tag("volunteer-checkout").await.unwrap().unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { sent: 1, rejected: 0 });
        assert_eq!(q.pending_count(ActionKind::CheckIn).await.unwrap(), 3);
        assert_eq!(network.requests_to("/api/volunteer/checkin"), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_items_enqueued_after_snapshot() {
        let network = Arc::new(ScriptedNetwork::new());
        let (q, _) = queue(network);
        enqueue_three(&q).await;
        let snapshot = q.drain_all(ActionKind::CheckIn).await.unwrap();

        // A page appends while the flush is sending the snapshot.
        q.enqueue(ActionKind::CheckIn, json!({"eventId": 4})).await.unwrap();
        let remaining = q.acknowledge(ActionKind::CheckIn, snapshot.len()).await.unwrap();

        assert_eq!(remaining, 1);
        let left = q.drain_all(ActionKind::CheckIn).await.unwrap();
        assert_eq!(left[0].payload["eventId"], 4);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let network = Arc::new(ScriptedNetwork::new());
        let (q, _) = queue(network);
        enqueue_three(&q).await;
        q.clear(ActionKind::CheckIn).await.unwrap();
        assert_eq!(q.pending_count(ActionKind::CheckIn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_flush_of_same_kind_is_skipped() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/api/volunteer/checkin", ok());
        let (q, _) = queue(network);
        enqueue_three(&q).await;

        q.flushing.lock().unwrap().insert(ActionKind::CheckIn);
        assert_eq!(
            q.flush(ActionKind::CheckIn).await.unwrap(),
            FlushOutcome::AlreadyFlushing
        );
        q.flushing.lock().unwrap().remove(&ActionKind::CheckIn);
        assert_eq!(
            q.flush(ActionKind::CheckIn).await.unwrap(),
            FlushOutcome::Flushed { sent: 3, rejected: 0 }
        );
    }
}
