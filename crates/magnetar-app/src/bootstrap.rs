//! Application bootstrap wiring.
//!
//! Loads configuration, installs telemetry, builds the session service
//! around the transfer engine, and starts the background tasks that keep
//! local state converged with the engine.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use magnetar_config::AppConfig;
use magnetar_engine::{StubEngine, TransferEngine};
use magnetar_events::EventBus;
use magnetar_session::{
    BootstrapSettings, SessionRuntimeConfig, SessionService, spawn_listener, spawn_reconciler,
};
use magnetar_telemetry::GlobalContextGuard;

use crate::error::{AppError, AppResult};

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    config: AppConfig,
    engine: Arc<dyn TransferEngine>,
    events: EventBus,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config = AppConfig::from_env().map_err(|err| AppError::config("config.load", err))?;

        // The stub engine stands in until a real transfer backend lands. It
        // reports a full overlay so the bootstrap gate opens immediately.
        let engine: Arc<dyn TransferEngine> =
            Arc::new(StubEngine::with_participants(config.bootstrap.min_participants));
        let events = EventBus::new();

        Ok(Self {
            config,
            engine,
            events,
        })
    }
}

/// Mirror every domain event into the structured log.
pub(crate) fn spawn_event_log(events: &EventBus) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            debug!(
                event_id = envelope.id,
                kind = envelope.event.kind(),
                session_id = ?envelope.event.session_id(),
                "domain event"
            );
        }
    })
}

/// Map loaded configuration onto the session service tunables.
pub(crate) fn runtime_config(config: &AppConfig) -> SessionRuntimeConfig {
    SessionRuntimeConfig {
        engine_call_timeout: config.engine.call_timeout(),
        work_dir: config.engine.work_dir.clone(),
        bootstrap: BootstrapSettings {
            min_participants: config.bootstrap.min_participants,
            poll_interval: config.bootstrap.poll_interval(),
            timeout: config.bootstrap.timeout(),
        },
        reconcile_interval: config.reconcile.interval(),
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify
/// testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        engine,
        events,
    } = dependencies;

    magnetar_telemetry::init_logging(&config.log, env!("CARGO_PKG_VERSION"))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    info!("magnetar application bootstrap starting");

    let journal = spawn_event_log(&events);
    let service = SessionService::new(engine, events, runtime_config(&config));

    let listener = spawn_listener(
        service.registry(),
        service.engine(),
        service.events(),
        config.engine.call_timeout(),
    );
    let reconciler = spawn_reconciler(
        service.registry(),
        service.engine(),
        service.events(),
        service.reconcile_interval(),
        config.engine.call_timeout(),
    );

    info!(
        min_participants = config.bootstrap.min_participants,
        work_dir = %config.engine.work_dir,
        "magnetar ready"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::io("signal.ctrl_c", err))?;

    info!("shutdown signal received");
    listener.abort();
    reconciler.abort();
    journal.abort();
    Ok(())
}
