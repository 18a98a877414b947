use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Write actions that may be queued while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    CheckIn,
    CheckOut,
    EventRegistration,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::CheckIn,
        ActionKind::CheckOut,
        ActionKind::EventRegistration,
    ];

    pub fn default_tag(&self) -> &'static str {
        match self {
            ActionKind::CheckIn => "volunteer-checkin",
            ActionKind::CheckOut => "volunteer-checkout",
            ActionKind::EventRegistration => "event-registration",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ActionKind::CheckIn => "/api/volunteer/checkin",
            ActionKind::CheckOut => "/api/volunteer/checkout",
            ActionKind::EventRegistration => "/api/events/register",
        }
    }

    pub fn default_storage_key(&self) -> &'static str {
        match self {
            ActionKind::CheckIn => "pending-checkins",
            ActionKind::CheckOut => "pending-checkouts",
            ActionKind::EventRegistration => "pending-registrations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "check-in" | "checkin" => Some(ActionKind::CheckIn),
            "check-out" | "checkout" => Some(ActionKind::CheckOut),
            "event-registration" | "registration" => Some(ActionKind::EventRegistration),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::CheckIn => write!(f, "check-in"),
            ActionKind::CheckOut => write!(f, "check-out"),
            ActionKind::EventRegistration => write!(f, "event-registration"),
        }
    }
}

/// A write captured while offline, replayed later as a JSON POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Idempotency key sent with the replayed request
    pub id: String,
    pub kind: ActionKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(kind: ActionKind, payload: Value) -> Self {
        Self::at(kind, payload, Utc::now())
    }

    pub fn at(kind: ActionKind, payload: Value, enqueued_at: DateTime<Utc>) -> Self {
        let id = Self::idempotency_key(kind, &payload, enqueued_at);
        Self {
            id,
            kind,
            payload,
            enqueued_at,
        }
    }

    /// Stable hex digest of what was enqueued and when.
    pub fn idempotency_key(kind: ActionKind, payload: &Value, enqueued_at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.default_tag().as_bytes());
        hasher.update(b"\n");
        hasher.update(
            enqueued_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        hasher.update(b"\n");
        hasher.update(payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// What a durable-store key holds: the ordered list for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub key: String,
    pub data: Vec<PendingAction>,
}

impl PendingRecord {
    pub fn empty(key: &str) -> Self {
        Self {
            key: key.to_string(),
            data: Vec::new(),
        }
    }
}
