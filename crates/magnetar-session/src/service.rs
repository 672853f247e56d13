//! Command dispatcher and the exposed session surface.
//!
//! Commands follow two commit disciplines against the external engine:
//! `add` mutates optimistically and rolls back on engine failure, while
//! `pause`/`resume` call the engine first and only commit locally on
//! success. `remove` treats deletion as local intent: the record goes away
//! even when the engine call fails, but the failure is still surfaced.
//!
//! Every engine call is bounded by the configured timeout so one
//! unresponsive call can never stall the dispatcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use magnetar_engine::TransferEngine;
use magnetar_events::{Event, EventBus, SessionStatus};

use crate::bootstrap::{BootstrapGate, BootstrapSettings};
use crate::deadline;
use crate::error::{SessionError, SessionResult};
use crate::model::{SessionId, SessionView, TorrentSession, validate_magnet};
use crate::reconcile::reconcile_from_engine;
use crate::registry::SessionRegistry;

/// Runtime tunables the dispatcher needs at construction time.
#[derive(Debug, Clone)]
pub struct SessionRuntimeConfig {
    /// Deadline applied to every engine network call.
    pub engine_call_timeout: Duration,
    /// Directory handed to the engine for payload storage.
    pub work_dir: String,
    /// Bootstrap gate tunables.
    pub bootstrap: BootstrapSettings,
    /// Delay between periodic reconciliation sweeps.
    pub reconcile_interval: Duration,
}

impl Default for SessionRuntimeConfig {
    fn default() -> Self {
        Self {
            engine_call_timeout: Duration::from_secs(10),
            work_dir: "downloads".to_owned(),
            bootstrap: BootstrapSettings::default(),
            reconcile_interval: Duration::from_secs(5),
        }
    }
}

/// The session lifecycle service. All writers to the registry go through
/// this dispatcher, the event listener, or the reconciliation adapter.
pub struct SessionService {
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn TransferEngine>,
    gate: BootstrapGate,
    events: EventBus,
    config: SessionRuntimeConfig,
}

impl SessionService {
    /// Construct the service around an engine and shared event bus.
    #[must_use]
    pub fn new(
        engine: Arc<dyn TransferEngine>,
        events: EventBus,
        config: SessionRuntimeConfig,
    ) -> Self {
        let gate = BootstrapGate::new(config.bootstrap.clone(), events.clone());
        Self {
            registry: Arc::new(SessionRegistry::new()),
            engine,
            gate,
            events,
            config,
        }
    }

    /// Shared registry handle for background task wiring.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shared engine handle for background task wiring.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn TransferEngine> {
        Arc::clone(&self.engine)
    }

    /// Shared event bus.
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Configured reconciliation sweep interval.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        self.config.reconcile_interval
    }

    /// Submit a new magnet download.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed or duplicate magnet,
    /// `BootstrapTimeout` when the overlay never becomes ready, and
    /// `EngineUnavailable` when the engine rejects the submission — in which
    /// case the optimistic local record is fully rolled back.
    pub async fn add_session(&self, magnet: &str) -> SessionResult<SessionView> {
        if !validate_magnet(magnet) {
            return Err(SessionError::InvalidArgument {
                reason: "malformed magnet URI",
            });
        }

        self.gate.await_ready(self.engine.as_ref()).await?;

        let session = TorrentSession::new(SessionId::new(), magnet);
        let id = session.id();
        let entry = self.registry.insert(session).await?;

        let submitted = self
            .bounded("submit", self.engine.submit(magnet, &self.config.work_dir))
            .await;
        let handle = match submitted {
            Ok(handle) => handle,
            Err(err) => {
                // Full rollback: the optimistic record must not survive.
                let _ = self.registry.remove(id).await;
                warn!(session_id = %id, "engine rejected submission; local record rolled back");
                return Err(err);
            }
        };

        let view = {
            let mut session = entry.lock().await;
            session.attach_handle(handle);
            session.view()
        };
        info!(session_id = %id, %handle, "session added");
        let _ = self.events.publish(Event::SessionAdded {
            session_id: id.0,
            magnet: magnet.to_owned(),
        });
        Ok(view)
    }

    /// Pause a session. Idempotent: pausing an already-paused (or seeding)
    /// session returns the current view without touching the engine.
    pub async fn pause_session(&self, id: SessionId) -> SessionResult<SessionView> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(SessionError::NotFound { session_id: id })?;

        // Held across the engine call so racing commands on this session
        // cannot interleave their commit steps.
        let mut session = entry.lock().await;
        match session.status() {
            SessionStatus::Paused | SessionStatus::Seeding => return Ok(session.view()),
            SessionStatus::Error => return Err(Self::unrecoverable(&session)),
            SessionStatus::Stopped => {
                return Err(SessionError::InvalidArgument {
                    reason: "session is stopped",
                });
            }
            SessionStatus::Added | SessionStatus::Downloading => {}
        }
        let handle = session.handle().ok_or(SessionError::InvalidArgument {
            reason: "session has no engine handle",
        })?;

        self.bounded("pause", self.engine.pause(handle)).await?;

        session.set_status(SessionStatus::Paused);
        info!(session_id = %id, "session paused");
        let _ = self.events.publish(Event::StatusChanged {
            session_id: id.0,
            status: SessionStatus::Paused,
        });
        Ok(session.view())
    }

    /// Resume a session. Idempotent: resuming an already-downloading (or
    /// seeding) session returns the current view without touching the engine.
    pub async fn resume_session(&self, id: SessionId) -> SessionResult<SessionView> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(SessionError::NotFound { session_id: id })?;

        let mut session = entry.lock().await;
        match session.status() {
            SessionStatus::Downloading | SessionStatus::Seeding => return Ok(session.view()),
            SessionStatus::Error => return Err(Self::unrecoverable(&session)),
            SessionStatus::Stopped => {
                return Err(SessionError::InvalidArgument {
                    reason: "session is stopped",
                });
            }
            SessionStatus::Added | SessionStatus::Paused => {}
        }
        let handle = session.handle().ok_or(SessionError::InvalidArgument {
            reason: "session has no engine handle",
        })?;

        self.bounded("resume", self.engine.resume(handle)).await?;

        session.set_status(SessionStatus::Downloading);
        info!(session_id = %id, "session resumed");
        let _ = self.events.publish(Event::StatusChanged {
            session_id: id.0,
            status: SessionStatus::Downloading,
        });
        Ok(session.view())
    }

    /// Remove a session. The local record is deleted even when the engine
    /// call fails; the failure is still surfaced for visibility.
    pub async fn remove_session(&self, id: SessionId) -> SessionResult<()> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(SessionError::NotFound { session_id: id })?;

        let session = entry.lock().await;
        let engine_result = match session.handle() {
            Some(handle) => self.bounded("remove", self.engine.remove(handle)).await,
            None => Ok(()),
        };
        // Entry lock released before touching the registry lock; lock order
        // is always registry before entry.
        drop(session);
        let _ = self.registry.remove(id).await;

        info!(session_id = %id, "session removed");
        let _ = self.events.publish(Event::SessionRemoved { session_id: id.0 });

        if let Err(err) = engine_result {
            warn!(session_id = %id, "engine removal failed; local record deleted anyway");
            return Err(err);
        }
        Ok(())
    }

    /// List every tracked session, reconciling engine state first.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        let _ = reconcile_from_engine(
            &self.registry,
            self.engine.as_ref(),
            &self.events,
            self.config.engine_call_timeout,
        )
        .await;
        self.registry.views().await
    }

    /// Fetch one session's view.
    pub async fn get_session(&self, id: SessionId) -> SessionResult<SessionView> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(SessionError::NotFound { session_id: id })?;
        let view = entry.lock().await.view();
        Ok(view)
    }

    fn unrecoverable(session: &TorrentSession) -> SessionError {
        SessionError::Unrecoverable {
            message: session
                .fault()
                .unwrap_or("engine reported a fatal transfer fault")
                .to_owned(),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> SessionResult<T> {
        deadline::bounded(self.config.engine_call_timeout, call)
            .await
            .map_err(|err| SessionError::engine(operation, err))
    }
}
