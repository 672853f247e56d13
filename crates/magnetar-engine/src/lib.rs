//! Engine-agnostic transfer interfaces and DTOs.
//!
//! The session layer drives the peer-wire engine exclusively through
//! [`TransferEngine`]; the engine's piece selection, handshakes, and
//! bencoding internals stay behind this boundary. Adapters publish
//! [`EngineEvent`]s on a broadcast channel that the session layer consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod stub;

pub use stub::StubEngine;

/// Opaque handle identifying one transfer inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineHandle(pub Uuid);

impl EngineHandle {
    /// Allocate a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Transfer states reported by the engine's status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Downloading,
    Paused,
    Seeding,
    Stopped,
    Failed,
}

/// Point-in-time status snapshot for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Completion ratio in percent, `0.0..=100.0`.
    pub progress: f64,
    /// Connected peer count.
    pub peers: u32,
    /// Download rate in MB/s.
    pub download_mbps: f64,
    /// Upload rate in MB/s.
    pub upload_mbps: f64,
    /// Engine-side transfer state.
    pub state: EngineState,
    /// Resolved torrent name, once metadata is available.
    pub name: Option<String>,
    /// Resolved info-hash, once metadata is available.
    pub info_hash: Option<String>,
    /// Engine-supplied estimated time remaining, opaque to callers.
    pub eta: Option<String>,
    /// Total payload size in bytes, once metadata is available.
    pub size_bytes: Option<u64>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            progress: 0.0,
            peers: 0,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            state: EngineState::Downloading,
            name: None,
            info_hash: None,
            eta: None,
            size_bytes: None,
        }
    }
}

/// Asynchronous events emitted by the engine for in-flight transfers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine admitted the transfer; handles start paused and must be
    /// resumed by the consumer.
    SessionAdded { handle: EngineHandle },
    /// Metadata resolved for a magnet submission.
    MetadataResolved {
        handle: EngineHandle,
        name: String,
        info_hash: String,
        size_bytes: u64,
    },
    /// A whole piece finished downloading.
    PieceCompleted {
        handle: EngineHandle,
        completed: u64,
        total: u64,
    },
    /// A block within a piece finished downloading.
    BlockCompleted {
        handle: EngineHandle,
        completed: u64,
        total: u64,
    },
    /// The engine hit a transfer fault.
    TransferError {
        handle: EngineHandle,
        message: String,
        recoverable: bool,
    },
    /// The transfer reached completion.
    TransferFinished { handle: EngineHandle },
}

impl EngineEvent {
    /// The handle this event targets.
    #[must_use]
    pub const fn handle(&self) -> EngineHandle {
        match self {
            EngineEvent::SessionAdded { handle }
            | EngineEvent::MetadataResolved { handle, .. }
            | EngineEvent::PieceCompleted { handle, .. }
            | EngineEvent::BlockCompleted { handle, .. }
            | EngineEvent::TransferError { handle, .. }
            | EngineEvent::TransferFinished { handle } => *handle,
        }
    }
}

/// Primary engine trait implemented by adapters.
///
/// Implementations must never block the caller beyond the duration of the
/// underlying operation; callers bound each invocation with their own
/// timeout.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Submit a magnet link, returning the handle for the admitted transfer.
    async fn submit(&self, magnet: &str, work_dir: &str) -> anyhow::Result<EngineHandle>;

    /// Pause an active transfer.
    async fn pause(&self, handle: EngineHandle) -> anyhow::Result<()>;

    /// Resume a paused transfer.
    async fn resume(&self, handle: EngineHandle) -> anyhow::Result<()>;

    /// Remove a transfer from the engine.
    async fn remove(&self, handle: EngineHandle) -> anyhow::Result<()>;

    /// Query the current status snapshot for a transfer.
    async fn status(&self, handle: EngineHandle) -> anyhow::Result<EngineStatus>;

    /// Number of known participants in the discovery overlay.
    async fn participant_count(&self) -> anyhow::Result<u64>;

    /// Subscribe to the engine's asynchronous event stream.
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
}
