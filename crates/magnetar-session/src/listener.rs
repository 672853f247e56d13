//! Engine event consumption.
//!
//! A background task drains the engine's broadcast stream and folds each
//! event into the registry. Rate queries are expensive, so progress events
//! only trigger one per crossed 20% milestone (at most five per session).
//! Events for unknown or already-removed handles are discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use magnetar_engine::{EngineEvent, EngineHandle, TransferEngine};
use magnetar_events::{Event, EventBus, SessionStatus};

use crate::deadline;
use crate::registry::{SessionEntry, SessionRegistry};

/// Spawn the listener task. It runs until the engine's event channel closes.
/// Engine calls made while folding events run under `call_timeout`.
#[must_use]
pub fn spawn_listener(
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn TransferEngine>,
    events: EventBus,
    call_timeout: Duration,
) -> JoinHandle<()> {
    let mut receiver = engine.subscribe_events();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    dispatch_event(&registry, engine.as_ref(), &events, call_timeout, event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine event stream lagged; state will be reconciled");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Apply one engine event to the registry.
pub(crate) async fn dispatch_event(
    registry: &SessionRegistry,
    engine: &dyn TransferEngine,
    events: &EventBus,
    call_timeout: Duration,
    event: EngineEvent,
) {
    let handle = event.handle();
    let Some(entry) = registry.entry_by_handle(handle).await else {
        debug!(%handle, kind = ?event, "discarding engine event for unknown handle");
        return;
    };

    match event {
        EngineEvent::SessionAdded { .. } => {
            start_transfer(&entry, engine, events, call_timeout, handle).await;
        }
        EngineEvent::MetadataResolved {
            name,
            info_hash,
            size_bytes,
            ..
        } => {
            let mut session = entry.lock().await;
            session.set_title(name);
            session.set_info_hash(info_hash);
            session.set_size_bytes(size_bytes);
        }
        EngineEvent::PieceCompleted {
            completed, total, ..
        }
        | EngineEvent::BlockCompleted {
            completed, total, ..
        } => {
            record_progress(&entry, engine, events, call_timeout, handle, completed, total).await;
        }
        EngineEvent::TransferError {
            message,
            recoverable,
            ..
        } => {
            if recoverable {
                debug!(%handle, message, "transient transfer error swallowed");
                return;
            }
            let mut session = entry.lock().await;
            if session.status().is_terminal() {
                return;
            }
            warn!(session_id = %session.id(), message, "unrecoverable transfer fault");
            session.record_fault(message);
            let _ = events.publish(Event::StatusChanged {
                session_id: session.id().0,
                status: SessionStatus::Error,
            });
        }
        EngineEvent::TransferFinished { .. } => {
            finish_transfer(&entry, engine, events, call_timeout, handle).await;
        }
    }
}

/// A newly admitted handle starts paused; resume it and commit the first
/// lifecycle transition.
async fn start_transfer(
    entry: &SessionEntry,
    engine: &dyn TransferEngine,
    events: &EventBus,
    call_timeout: Duration,
    handle: EngineHandle,
) {
    let mut session = entry.lock().await;
    if session.status() != SessionStatus::Added {
        return;
    }
    if let Err(err) = deadline::bounded(call_timeout, engine.resume(handle)).await {
        warn!(session_id = %session.id(), error = %err, "failed to start admitted transfer");
        return;
    }
    session.set_status(SessionStatus::Downloading);
    info!(session_id = %session.id(), "transfer started");
    let _ = events.publish(Event::StatusChanged {
        session_id: session.id().0,
        status: SessionStatus::Downloading,
    });
}

async fn record_progress(
    entry: &SessionEntry,
    engine: &dyn TransferEngine,
    events: &EventBus,
    call_timeout: Duration,
    handle: EngineHandle,
    completed: u64,
    total: u64,
) {
    if total == 0 {
        return;
    }
    #[allow(clippy::cast_precision_loss)]
    let percent = (completed as f64 / total as f64) * 100.0;

    let mut session = entry.lock().await;
    let before = session.status();
    session.set_progress(percent);
    let _ = events.publish(Event::ProgressUpdated {
        session_id: session.id().0,
        progress: session.progress(),
    });

    if session.milestone_crossed() {
        session.advance_milestone();
        match deadline::bounded(call_timeout, engine.status(handle)).await {
            Ok(status) => {
                session.set_download_speed(Some(&format!("{:.2}", status.download_mbps)));
                session.set_upload_speed(Some(&format!("{:.2}", status.upload_mbps)));
                session.set_peers(status.peers);
                if let Some(eta) = status.eta {
                    session.set_eta(eta);
                }
            }
            Err(err) => {
                debug!(%handle, error = %err, "milestone rate query failed");
            }
        }
    }

    let after = session.status();
    if after != before {
        let _ = events.publish(Event::StatusChanged {
            session_id: session.id().0,
            status: after,
        });
    }
}

/// Seed-and-idle: a finished transfer is parked in the engine rather than
/// left re-announcing indefinitely.
async fn finish_transfer(
    entry: &SessionEntry,
    engine: &dyn TransferEngine,
    events: &EventBus,
    call_timeout: Duration,
    handle: EngineHandle,
) {
    let mut session = entry.lock().await;
    session.set_progress(100.0);
    session.reset_milestones();
    let session_id = session.id();
    let status = session.status();
    drop(session);

    if let Err(err) = deadline::bounded(call_timeout, engine.pause(handle)).await {
        warn!(%handle, error = %err, "failed to park finished transfer");
    }

    info!(session_id = %session_id, "transfer finished");
    let _ = events.publish(Event::StatusChanged {
        session_id: session_id.0,
        status,
    });
    let _ = events.publish(Event::SessionFinished {
        session_id: session_id.0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionId, TorrentSession};
    use magnetar_engine::{EngineState, EngineStatus, StubEngine};

    const DEADLINE: Duration = Duration::from_secs(1);

    async fn tracked_session(
        registry: &SessionRegistry,
        engine: &StubEngine,
        magnet: &str,
    ) -> (SessionId, EngineHandle) {
        let handle = engine.submit(magnet, "/tmp/downloads").await.expect("submit");
        let mut session = TorrentSession::new(SessionId::new(), magnet);
        let id = session.id();
        session.attach_handle(handle);
        registry.insert(session).await.expect("insert");
        (id, handle)
    }

    #[tokio::test]
    async fn session_added_resumes_engine_and_starts_downloading() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::SessionAdded { handle },
        )
        .await;

        assert_eq!(engine.resumed(), vec![handle]);
        let entry = registry.entry(id).await.expect("entry");
        assert_eq!(entry.lock().await.status(), SessionStatus::Downloading);
    }

    #[tokio::test]
    async fn session_added_is_ignored_once_past_added() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;
        registry
            .entry(id)
            .await
            .expect("entry")
            .lock()
            .await
            .set_status(SessionStatus::Paused);

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::SessionAdded { handle },
        )
        .await;

        assert!(engine.resumed().is_empty());
    }

    #[tokio::test]
    async fn progress_events_update_stored_percentage() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::PieceCompleted {
                handle,
                completed: 1,
                total: 8,
            },
        )
        .await;

        let entry = registry.entry(id).await.expect("entry");
        assert_eq!(entry.lock().await.progress(), 12.5);
    }

    #[tokio::test]
    async fn milestones_throttle_rate_queries_to_five() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(64);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;
        engine.set_status(
            handle,
            EngineStatus {
                progress: 0.0,
                peers: 9,
                download_mbps: 5.234,
                upload_mbps: 2.449,
                state: EngineState::Downloading,
                ..EngineStatus::default()
            },
        );

        // One event per percent point; only five 20% boundaries exist.
        for completed in 1..=100u64 {
            dispatch_event(
                &registry,
                &engine,
                &bus,
                DEADLINE,
                EngineEvent::BlockCompleted {
                    handle,
                    completed,
                    total: 100,
                },
            )
            .await;
        }

        assert_eq!(
            engine.status_queries().len(),
            5,
            "rate queries must stop at the milestone budget"
        );
        let entry = registry.entry(id).await.expect("entry");
        let session = entry.lock().await;
        assert!(!session.milestone_crossed());
        assert_eq!(session.peers(), 9);
        let view = session.view();
        assert_eq!(view.download_speed, "5.23 MB/s");
        assert_eq!(view.upload_speed, "2.45 MB/s");
    }

    #[tokio::test]
    async fn unrecoverable_error_moves_session_to_error() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::TransferError {
                handle,
                message: "tracker hiccup".into(),
                recoverable: true,
            },
        )
        .await;
        let entry = registry.entry(id).await.expect("entry");
        assert_eq!(entry.lock().await.status(), SessionStatus::Added);

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::TransferError {
                handle,
                message: "storage failure".into(),
                recoverable: false,
            },
        )
        .await;
        assert_eq!(entry.lock().await.status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn finished_transfer_seeds_and_parks_the_handle() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;
        let mut stream = bus.subscribe(None);

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::TransferFinished { handle },
        )
        .await;

        let entry = registry.entry(id).await.expect("entry");
        {
            let session = entry.lock().await;
            assert_eq!(session.status(), SessionStatus::Seeding);
            assert_eq!(session.progress(), 100.0);
        }
        assert_eq!(engine.paused(), vec![handle]);

        let status_event = stream.next().await.expect("status event");
        assert_eq!(
            status_event.event,
            Event::StatusChanged {
                session_id: id.0,
                status: SessionStatus::Seeding,
            }
        );
        let finished_event = stream.next().await.expect("finished event");
        assert_eq!(
            finished_event.event,
            Event::SessionFinished { session_id: id.0 }
        );
    }

    #[tokio::test]
    async fn metadata_resolution_fills_title_and_info_hash() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;

        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::MetadataResolved {
                handle,
                name: "Big Buck Bunny".into(),
                info_hash: "c12fe1c06bde254f4e710816fa1a1a3e9ff79b2".into(),
                size_bytes: 734_003_200,
            },
        )
        .await;

        let entry = registry.entry(id).await.expect("entry");
        let view = entry.lock().await.view();
        assert_eq!(view.title.as_deref(), Some("Big Buck Bunny"));
        assert_eq!(
            view.info_hash.as_deref(),
            Some("c12fe1c06bde254f4e710816fa1a1a3e9ff79b2")
        );
        assert_eq!(view.size_bytes, Some(734_003_200));
    }

    #[tokio::test]
    async fn events_for_unknown_handles_are_discarded() {
        let registry = SessionRegistry::new();
        let engine = StubEngine::new();
        let bus = EventBus::with_capacity(16);

        // No sessions registered; nothing should panic or be created.
        dispatch_event(
            &registry,
            &engine,
            &bus,
            DEADLINE,
            EngineEvent::TransferFinished {
                handle: EngineHandle::new(),
            },
        )
        .await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn spawned_listener_consumes_live_events() {
        let registry = Arc::new(SessionRegistry::new());
        let engine = Arc::new(StubEngine::new());
        let bus = EventBus::with_capacity(16);
        let (id, handle) =
            tracked_session(&registry, &engine, "magnet:?xt=urn:btih:abcd").await;

        let task = spawn_listener(
            Arc::clone(&registry),
            Arc::<StubEngine>::clone(&engine) as Arc<dyn TransferEngine>,
            bus.clone(),
            DEADLINE,
        );
        let mut stream = bus.subscribe(None);

        engine.emit(EngineEvent::TransferFinished { handle });
        let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("listener reacted in time")
            .expect("event present");
        assert_eq!(
            envelope.event,
            Event::StatusChanged {
                session_id: id.0,
                status: SessionStatus::Seeding,
            }
        );

        task.abort();
    }
}
