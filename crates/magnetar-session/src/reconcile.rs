//! Reconciliation of external engine state into the registry.
//!
//! Snapshots arrive as field-name/value maps (one per session). The merge is
//! an explicit match over the closed field set; unknown fields fall through,
//! absent fields leave the stored value untouched, and coercion failures
//! degrade to the field's zero value so one corrupt field never blocks the
//! rest of the snapshot. Snapshots never create sessions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use magnetar_engine::{EngineState, EngineStatus, TransferEngine};
use magnetar_events::{Event, EventBus, SessionStatus};

use crate::deadline;
use crate::model::{SessionId, TorrentSession};
use crate::registry::SessionRegistry;

/// Field-name to value mapping for one session in an external snapshot.
pub type FieldMap = serde_json::Map<String, Value>;

/// Merge an external snapshot into the registry, returning the number of
/// sessions actually updated. Entries for unknown identifiers are ignored.
pub async fn merge_snapshot(
    registry: &SessionRegistry,
    snapshot: Vec<(SessionId, FieldMap)>,
    events: &EventBus,
) -> usize {
    let mut merged = 0;
    for (id, fields) in snapshot {
        let Some(entry) = registry.entry(id).await else {
            debug!(session_id = %id, "snapshot entry for unknown session ignored");
            continue;
        };
        let mut session = entry.lock().await;
        apply_fields(&mut session, &fields);
        session.enforce_seeding_invariant();
        merged += 1;
    }
    if merged > 0 {
        let _ = events.publish(Event::SnapshotMerged { sessions: merged });
    }
    merged
}

/// Apply one session's field map through the typed setters.
fn apply_fields(session: &mut TorrentSession, fields: &FieldMap) {
    for (name, value) in fields {
        match name.as_str() {
            "title" => {
                if let Some(title) = value.as_str() {
                    session.set_title(title);
                }
            }
            // Immutable after creation; snapshots cannot rewrite it.
            "magnet" => {}
            "infoHash" => {
                if let Some(info_hash) = value.as_str() {
                    session.set_info_hash(info_hash);
                }
            }
            "progress" => session.set_progress(coerce_f64(value)),
            "downloadSpeed" => session.set_download_speed(coerce_text(value).as_deref()),
            "uploadSpeed" => session.set_upload_speed(coerce_text(value).as_deref()),
            "peers" => session.set_peers(coerce_u32(value)),
            "eta" => {
                if let Some(eta) = value.as_str() {
                    session.set_eta(eta);
                }
            }
            "status" => {
                if let Some(status) = value.as_str() {
                    session.set_status(SessionStatus::parse_lenient(status));
                }
            }
            _ => {}
        }
    }
}

fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn coerce_u32(value: &Value) -> u32 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .and_then(|peers| u32::try_from(peers).ok())
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Textual form handed to the speed normalizer; non-scalar input maps to
/// `None`, which the normalizer turns into the zero speed.
fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

/// Fold the engine's authoritative status for every tracked handle into the
/// registry. Engine calls run without any registry or entry lock held, each
/// bounded by `call_timeout`.
pub async fn reconcile_from_engine(
    registry: &SessionRegistry,
    engine: &dyn TransferEngine,
    events: &EventBus,
    call_timeout: Duration,
) -> usize {
    let entries = registry.snapshot().await;
    let mut merged = 0;
    for entry in entries {
        let handle = { entry.lock().await.handle() };
        let Some(handle) = handle else {
            continue;
        };
        match deadline::bounded(call_timeout, engine.status(handle)).await {
            Ok(status) => {
                let mut session = entry.lock().await;
                apply_engine_status(&mut session, &status);
                merged += 1;
            }
            Err(err) => {
                debug!(%handle, error = %err, "engine status query failed during reconciliation");
            }
        }
    }
    if merged > 0 {
        let _ = events.publish(Event::SnapshotMerged { sessions: merged });
    }
    merged
}

fn apply_engine_status(session: &mut TorrentSession, status: &EngineStatus) {
    session.set_progress(status.progress);
    session.set_peers(status.peers);
    session.set_download_speed(Some(&format!("{:.2}", status.download_mbps)));
    session.set_upload_speed(Some(&format!("{:.2}", status.upload_mbps)));
    if let Some(name) = &status.name {
        session.set_title(name);
    }
    if let Some(info_hash) = &status.info_hash {
        session.set_info_hash(info_hash);
    }
    if let Some(eta) = &status.eta {
        session.set_eta(eta);
    }
    if let Some(size_bytes) = status.size_bytes {
        session.set_size_bytes(size_bytes);
    }
    // A just-admitted transfer sits paused in the engine until the listener
    // starts it; that is not a user pause, so `Added` stays put.
    let not_started =
        session.status() == SessionStatus::Added && status.state == EngineState::Paused;
    if !session.status().is_terminal() && !not_started {
        session.set_status(match status.state {
            EngineState::Downloading => SessionStatus::Downloading,
            EngineState::Paused => SessionStatus::Paused,
            EngineState::Seeding => SessionStatus::Seeding,
            EngineState::Stopped => SessionStatus::Stopped,
            EngineState::Failed => SessionStatus::Error,
        });
    }
    session.enforce_seeding_invariant();
}

/// Spawn the periodic reconciliation sweep.
#[must_use]
pub fn spawn_reconciler(
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn TransferEngine>,
    events: EventBus,
    interval: Duration,
    call_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let merged =
                reconcile_from_engine(&registry, engine.as_ref(), &events, call_timeout).await;
            if merged > 0 {
                debug!(sessions = merged, "reconciliation sweep applied");
            }
        }
    })
}
