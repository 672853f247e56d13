//! In-memory engine double used by tests and the default app wiring.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{EngineEvent, EngineHandle, EngineState, EngineStatus, TransferEngine};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scriptable in-memory implementation of [`TransferEngine`].
///
/// Failure injection and participant scripting let tests drive every branch
/// of the session layer without a live peer-wire engine.
pub struct StubEngine {
    transfers: Mutex<HashMap<EngineHandle, StubTransfer>>,
    participant_script: Mutex<Vec<u64>>,
    participants: Mutex<u64>,
    fail_submit: AtomicBool,
    fail_pause: AtomicBool,
    fail_resume: AtomicBool,
    fail_remove: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
    submitted: Mutex<Vec<String>>,
    paused: Mutex<Vec<EngineHandle>>,
    resumed: Mutex<Vec<EngineHandle>>,
    removed: Mutex<Vec<EngineHandle>>,
    status_queries: Mutex<Vec<EngineHandle>>,
}

struct StubTransfer {
    magnet: String,
    status: EngineStatus,
}

impl StubEngine {
    /// Construct a stub with a healthy overlay (participant threshold met).
    #[must_use]
    pub fn new() -> Self {
        Self::with_participants(64)
    }

    /// Construct a stub reporting a fixed overlay participant count.
    #[must_use]
    pub fn with_participants(participants: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transfers: Mutex::new(HashMap::new()),
            participant_script: Mutex::new(Vec::new()),
            participants: Mutex::new(participants),
            fail_submit: AtomicBool::new(false),
            fail_pause: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            events,
            submitted: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
        }
    }

    /// Queue a sequence of participant counts returned by successive polls;
    /// once exhausted, the last scripted value repeats.
    pub fn script_participants(&self, counts: Vec<u64>) {
        *self.participant_script.lock().expect("stub mutex poisoned") = counts;
    }

    /// Override the steady-state participant count.
    pub fn set_participants(&self, participants: u64) {
        *self.participants.lock().expect("stub mutex poisoned") = participants;
    }

    /// Make the given operations fail until cleared.
    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pause(&self, fail: bool) {
        self.fail_pause.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Replace the status snapshot returned for a handle.
    pub fn set_status(&self, handle: EngineHandle, status: EngineStatus) {
        if let Some(transfer) = self
            .transfers
            .lock()
            .expect("stub mutex poisoned")
            .get_mut(&handle)
        {
            transfer.status = status;
        }
    }

    /// Publish an event as if the engine had emitted it.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Magnets submitted so far, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().expect("stub mutex poisoned").clone()
    }

    /// Handles paused so far, in order.
    #[must_use]
    pub fn paused(&self) -> Vec<EngineHandle> {
        self.paused.lock().expect("stub mutex poisoned").clone()
    }

    /// Handles resumed so far, in order.
    #[must_use]
    pub fn resumed(&self) -> Vec<EngineHandle> {
        self.resumed.lock().expect("stub mutex poisoned").clone()
    }

    /// Handles removed so far, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<EngineHandle> {
        self.removed.lock().expect("stub mutex poisoned").clone()
    }

    /// Handles whose status was queried so far, in order.
    #[must_use]
    pub fn status_queries(&self) -> Vec<EngineHandle> {
        self.status_queries
            .lock()
            .expect("stub mutex poisoned")
            .clone()
    }

    fn transfer_state(&self, handle: EngineHandle) -> Result<EngineState> {
        self.transfers
            .lock()
            .expect("stub mutex poisoned")
            .get(&handle)
            .map(|transfer| transfer.status.state)
            .ok_or_else(|| anyhow!("unknown transfer {handle}"))
    }

    fn set_state(&self, handle: EngineHandle, state: EngineState) -> Result<()> {
        self.transfers
            .lock()
            .expect("stub mutex poisoned")
            .get_mut(&handle)
            .map(|transfer| transfer.status.state = state)
            .ok_or_else(|| anyhow!("unknown transfer {handle}"))
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferEngine for StubEngine {
    async fn submit(&self, magnet: &str, _work_dir: &str) -> Result<EngineHandle> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(anyhow!("engine rejected magnet submission"));
        }
        let handle = EngineHandle::new();
        self.transfers.lock().expect("stub mutex poisoned").insert(
            handle,
            StubTransfer {
                magnet: magnet.to_owned(),
                status: EngineStatus {
                    state: EngineState::Paused,
                    ..EngineStatus::default()
                },
            },
        );
        self.submitted
            .lock()
            .expect("stub mutex poisoned")
            .push(magnet.to_owned());
        let _ = self.events.send(EngineEvent::SessionAdded { handle });
        Ok(handle)
    }

    async fn pause(&self, handle: EngineHandle) -> Result<()> {
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(anyhow!("engine pause failed"));
        }
        self.transfer_state(handle)?;
        self.set_state(handle, EngineState::Paused)?;
        self.paused.lock().expect("stub mutex poisoned").push(handle);
        Ok(())
    }

    async fn resume(&self, handle: EngineHandle) -> Result<()> {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(anyhow!("engine resume failed"));
        }
        self.transfer_state(handle)?;
        self.set_state(handle, EngineState::Downloading)?;
        self.resumed
            .lock()
            .expect("stub mutex poisoned")
            .push(handle);
        Ok(())
    }

    async fn remove(&self, handle: EngineHandle) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(anyhow!("engine remove failed"));
        }
        self.transfers
            .lock()
            .expect("stub mutex poisoned")
            .remove(&handle)
            .ok_or_else(|| anyhow!("unknown transfer {handle}"))?;
        self.removed
            .lock()
            .expect("stub mutex poisoned")
            .push(handle);
        Ok(())
    }

    async fn status(&self, handle: EngineHandle) -> Result<EngineStatus> {
        self.status_queries
            .lock()
            .expect("stub mutex poisoned")
            .push(handle);
        self.transfers
            .lock()
            .expect("stub mutex poisoned")
            .get(&handle)
            .map(|transfer| transfer.status.clone())
            .ok_or_else(|| anyhow!("unknown transfer {handle}"))
    }

    async fn participant_count(&self) -> Result<u64> {
        let mut script = self.participant_script.lock().expect("stub mutex poisoned");
        if script.is_empty() {
            return Ok(*self.participants.lock().expect("stub mutex poisoned"));
        }
        let next = script.remove(0);
        if script.is_empty() {
            *self.participants.lock().expect("stub mutex poisoned") = next;
        }
        Ok(next)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
