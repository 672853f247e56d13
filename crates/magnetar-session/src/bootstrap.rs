//! Overlay readiness gate.
//!
//! No transfer may start until the discovery overlay knows enough
//! participants; a cold overlay would otherwise stall the first download
//! deep inside the engine. The wait runs once per process: success is
//! latched and later commands pass straight through, while a timed-out
//! attempt re-arms so the next command retries.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use magnetar_engine::TransferEngine;
use magnetar_events::{Event, EventBus};

use crate::error::{SessionError, SessionResult};

/// Tunables for the bootstrap wait.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Minimum overlay participants before transfers may start.
    pub min_participants: u64,
    /// Delay between participant-count polls.
    pub poll_interval: Duration,
    /// Overall deadline for the wait.
    pub timeout: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            min_participants: 10,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// One-shot gate blocking session starts until the overlay is ready.
pub struct BootstrapGate {
    settings: BootstrapSettings,
    ready: Mutex<bool>,
    events: EventBus,
}

impl BootstrapGate {
    /// Construct a gate that publishes readiness events on the shared bus.
    #[must_use]
    pub fn new(settings: BootstrapSettings, events: EventBus) -> Self {
        Self {
            settings,
            ready: Mutex::new(false),
            events,
        }
    }

    /// Block until the overlay reaches the participant threshold.
    ///
    /// Returns immediately once a previous wait succeeded. Concurrent first
    /// callers queue behind the gate lock, so the overlay is only polled by
    /// one task at a time.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BootstrapTimeout`] if the threshold is not
    /// reached within the configured deadline. The failure affects only the
    /// triggering command; the gate stays armed for the next attempt.
    pub async fn await_ready(&self, engine: &dyn TransferEngine) -> SessionResult<()> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        loop {
            let participants = match engine.participant_count().await {
                Ok(count) => count,
                Err(err) => {
                    debug!(error = %err, "overlay participant query failed; treating as zero");
                    0
                }
            };

            if participants >= self.settings.min_participants {
                *ready = true;
                info!(participants, "discovery overlay bootstrapped");
                let _ = self.events.publish(Event::BootstrapReady { participants });
                return Ok(());
            }

            if Instant::now() + self.settings.poll_interval > deadline {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(
                    participants,
                    threshold = self.settings.min_participants,
                    waited_ms,
                    "overlay bootstrap timed out"
                );
                let _ = self.events.publish(Event::BootstrapTimedOut { waited_ms });
                return Err(SessionError::BootstrapTimeout { waited_ms });
            }

            sleep(self.settings.poll_interval).await;
        }
    }

    /// Whether a previous wait already succeeded.
    pub async fn is_ready(&self) -> bool {
        *self.ready.lock().await
    }

    /// Re-arm the gate, forcing the next command to wait again. Used when
    /// the overlay connection is lost.
    pub async fn reset(&self) {
        *self.ready.lock().await = false;
    }
}
