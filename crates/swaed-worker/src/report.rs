//! JSON views of worker outcomes for the terminal.

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};

use swaed_worker_core::cache::{RefreshReport, ResponseSource};
use swaed_worker_core::notify::ClickOutcome;
use swaed_worker_core::{
    ActionKind, EventOutcome, FlushOutcome, PendingAction, Response, StatsSnapshot,
};

use crate::Worker;

/// Bodies longer than this are cut when printed.
const BODY_PREVIEW_CHARS: usize = 2000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    state: String,
    bucket: String,
    bucket_entries: usize,
    buckets: Vec<String>,
    pending: Value,
    skip_waiting: bool,
    clients_claimed: bool,
    stats: StatsSnapshot,
}

pub fn print_json(value: &Value) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn pending_action(action: &PendingAction) -> Value {
    json!({
        "id": action.id,
        "kind": action.kind.to_string(),
        "payload": action.payload,
        "enqueuedAt": action.enqueued_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

/// Every queued action, grouped by kind.
pub async fn pending(worker: &Worker) -> Result<Value> {
    let mut grouped = serde_json::Map::new();
    for kind in ActionKind::ALL {
        let actions = worker.queue().drain_all(kind).await?;
        grouped.insert(
            kind.to_string(),
            Value::Array(actions.iter().map(pending_action).collect()),
        );
    }
    Ok(Value::Object(grouped))
}

pub async fn status(worker: &Worker) -> Result<Value> {
    let mut pending = serde_json::Map::new();
    for kind in ActionKind::ALL {
        let count = worker.queue().pending_count(kind).await?;
        pending.insert(kind.to_string(), json!(count));
    }

    let status = Status {
        state: format!("{:?}", worker.state()).to_lowercase(),
        bucket: worker.cache().bucket().to_string(),
        bucket_entries: worker.cache().entry_count().await?,
        buckets: worker.cache().bucket_names().await?,
        pending: Value::Object(pending),
        skip_waiting: worker.skip_waiting_requested(),
        clients_claimed: worker.clients_claimed(),
        stats: worker.stats(),
    };
    Ok(serde_json::to_value(status)?)
}

pub fn outcome(outcome: EventOutcome) -> Value {
    match outcome {
        EventOutcome::Installed { cached } => json!({ "installed": { "cached": cached } }),
        EventOutcome::Activated { deleted } => json!({ "activated": { "deleted": deleted } }),
        EventOutcome::Fetched(served) => json!({
            "source": source_name(served.source),
            "response": response(&served.response),
        }),
        EventOutcome::Synced(flush) => json!({ "synced": flush_outcome(&flush) }),
        EventOutcome::Refreshed(report) => json!({ "refreshed": refresh_report(&report) }),
        EventOutcome::ShowNotification(notification) => json!({ "notification": notification }),
        EventOutcome::NotificationClicked(click) => json!({ "click": click_outcome(&click) }),
        EventOutcome::Replied(reply) => json!({ "reply": reply }),
        EventOutcome::Ignored => json!({ "ignored": true }),
    }
}

fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::StaleCache => "stale-cache",
        ResponseSource::OfflinePage => "offline-page",
        ResponseSource::Synthesized => "synthesized",
    }
}

fn response(response: &Response) -> Value {
    let body = match response.parse_json::<Value>() {
        Ok(value) => value,
        Err(_) => {
            let text = response.text();
            match text.char_indices().nth(BODY_PREVIEW_CHARS) {
                Some((idx, _)) => Value::String(format!("{}...", &text[..idx])),
                None => Value::String(text),
            }
        }
    };
    json!({
        "status": response.status,
        "statusText": response.status_text,
        "headers": response.headers,
        "body": body,
    })
}

fn flush_outcome(flush: &FlushOutcome) -> Value {
    match flush {
        FlushOutcome::Empty => json!({ "result": "empty" }),
        FlushOutcome::Flushed { sent, rejected } => {
            json!({ "result": "flushed", "sent": sent, "rejected": rejected })
        }
        FlushOutcome::Abandoned { sent, error } => {
            json!({ "result": "abandoned", "sent": sent, "error": error })
        }
        FlushOutcome::AlreadyFlushing => json!({ "result": "already-flushing" }),
    }
}

fn refresh_report(report: &RefreshReport) -> Value {
    json!({ "refreshed": report.refreshed, "failed": report.failed })
}

fn click_outcome(click: &ClickOutcome) -> Value {
    json!({ "close": click.close, "openUrl": click.open_url })
}
