//! Offline queue for check-in, check-out and event registration.
//!
//! Pages append actions to a per-kind list in the durable store while
//! offline; a background-sync trigger replays that list to the kind's
//! endpoint in insertion order.

pub mod outbox;
pub mod pending;
pub mod store;

pub use outbox::{ActionQueue, FlushOutcome, IDEMPOTENCY_HEADER};
pub use pending::{ActionKind, PendingAction, PendingRecord};
pub use store::{DurableStore, FileStore, MemoryStore};
