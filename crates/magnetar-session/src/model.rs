//! Session entity, typed field setters, and input normalization.
//!
//! All mutation goes through typed setters that keep the stored values
//! canonical: progress is clamped and rounded to two decimals, speeds are
//! normalized to `"X.XX MB/s"`, and the seeding invariant is re-evaluated on
//! every progress write.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use magnetar_engine::EngineHandle;
use magnetar_events::SessionStatus;

/// Canonical zero value for speed fields.
pub const ZERO_SPEED: &str = "0.00 MB/s";

/// Number of 20% progress quantiles, bounding rate queries per session.
pub const MAX_MILESTONES: u8 = 5;

static EXACT_TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[?&]xt=urn:btih:[0-9a-z]+").expect("exact-topic pattern must compile")
});

/// Unique identifier for one tracked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Check a magnet URI against the accepted grammar: the `magnet:` scheme and
/// at least one `xt=urn:btih:<infohash>` exact-topic parameter.
#[must_use]
pub fn validate_magnet(uri: &str) -> bool {
    uri.starts_with("magnet:") && EXACT_TOPIC.is_match(uri)
}

/// Normalize a speed value into the canonical `"X.XX MB/s"` form.
///
/// Missing, empty, negative, or unparsable input degrades to
/// [`ZERO_SPEED`]; the function never fails and is idempotent over its own
/// output.
#[must_use]
pub fn normalize_speed(input: Option<&str>) -> String {
    let Some(raw) = input else {
        return ZERO_SPEED.to_owned();
    };
    let trimmed = raw.trim().trim_end_matches("MB/s").trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => format!("{value:.2} MB/s"),
        _ => ZERO_SPEED.to_owned(),
    }
}

fn round_percent(value: f64) -> f64 {
    let clamped = value.clamp(0.0, 100.0);
    (clamped * 100.0).round() / 100.0
}

/// The central entity: one tracked download lifecycle for a magnet URI.
///
/// Owned exclusively by the [`crate::registry::SessionRegistry`]; other
/// components receive short-lived [`SessionView`] copies.
#[derive(Debug, Clone)]
pub struct TorrentSession {
    id: SessionId,
    magnet_uri: String,
    handle: Option<EngineHandle>,
    info_hash: Option<String>,
    title: Option<String>,
    progress: f64,
    download_speed: String,
    upload_speed: String,
    peers: u32,
    eta: Option<String>,
    size_bytes: Option<u64>,
    status: SessionStatus,
    fault: Option<String>,
    milestone: u8,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TorrentSession {
    /// Create a new session in the `Added` state.
    #[must_use]
    pub fn new(id: SessionId, magnet_uri: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            magnet_uri: magnet_uri.into(),
            handle: None,
            info_hash: None,
            title: None,
            progress: 0.0,
            download_speed: ZERO_SPEED.to_owned(),
            upload_speed: ZERO_SPEED.to_owned(),
            peers: 0,
            eta: None,
            size_bytes: None,
            status: SessionStatus::Added,
            fault: None,
            milestone: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Immutable session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Immutable magnet URI this session was created from.
    #[must_use]
    pub fn magnet_uri(&self) -> &str {
        &self.magnet_uri
    }

    /// Engine handle, present once the engine accepted the submission.
    #[must_use]
    pub const fn handle(&self) -> Option<EngineHandle> {
        self.handle
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Stored progress percentage, rounded to two decimals.
    #[must_use]
    pub const fn progress(&self) -> f64 {
        self.progress
    }

    /// Connected peer count.
    #[must_use]
    pub const fn peers(&self) -> u32 {
        self.peers
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Attach the engine handle after a successful submission.
    pub fn attach_handle(&mut self, handle: EngineHandle) {
        self.handle = Some(handle);
        self.touch();
    }

    /// Record the resolved torrent title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.touch();
    }

    /// Record the resolved info-hash.
    pub fn set_info_hash(&mut self, info_hash: impl Into<String>) {
        self.info_hash = Some(info_hash.into());
        self.touch();
    }

    /// Record the total payload size once metadata resolves.
    pub fn set_size_bytes(&mut self, size_bytes: u64) {
        self.size_bytes = Some(size_bytes);
        self.touch();
    }

    /// Store progress, clamped to `[0, 100]` and rounded to two decimals.
    ///
    /// Re-evaluates the seeding invariant: a non-terminal session whose
    /// stored progress reaches 100.0 moves to `Seeding`.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = round_percent(progress);
        self.enforce_seeding_invariant();
        self.touch();
    }

    /// Move a non-terminal, fully-downloaded session to `Seeding`.
    pub fn enforce_seeding_invariant(&mut self) {
        if self.progress >= 100.0 && !self.status.is_terminal() {
            self.status = SessionStatus::Seeding;
        }
    }

    /// Store a download speed, normalizing to `"X.XX MB/s"`.
    pub fn set_download_speed(&mut self, speed: Option<&str>) {
        self.download_speed = normalize_speed(speed);
        self.touch();
    }

    /// Store an upload speed, normalizing to `"X.XX MB/s"`.
    pub fn set_upload_speed(&mut self, speed: Option<&str>) {
        self.upload_speed = normalize_speed(speed);
        self.touch();
    }

    /// Store the connected peer count.
    pub fn set_peers(&mut self, peers: u32) {
        self.peers = peers;
        self.touch();
    }

    /// Store the engine-supplied ETA string.
    pub fn set_eta(&mut self, eta: impl Into<String>) {
        self.eta = Some(eta.into());
        self.touch();
    }

    /// Set the lifecycle status directly. Transition legality is enforced by
    /// the command dispatcher and listener, not here.
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
    }

    /// Record a fatal engine fault: the session moves to `Error` and the
    /// message is kept for later command rejections.
    pub fn record_fault(&mut self, message: impl Into<String>) {
        self.fault = Some(message.into());
        self.status = SessionStatus::Error;
        self.touch();
    }

    /// The fatal fault message, if the session errored.
    #[must_use]
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Whether the stored progress has crossed the next 20% quantile since
    /// the last rate query.
    #[must_use]
    pub fn milestone_crossed(&self) -> bool {
        if self.milestone >= MAX_MILESTONES {
            return false;
        }
        let quantile = (self.progress / 20.0) as u8;
        quantile > self.milestone
    }

    /// Consume the next milestone after issuing a rate query.
    pub fn advance_milestone(&mut self) {
        if self.milestone < MAX_MILESTONES {
            self.milestone += 1;
        }
    }

    /// Reset the milestone counter, e.g. when the transfer finishes.
    pub fn reset_milestones(&mut self) {
        self.milestone = 0;
    }

    /// Produce the external representation of this session.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            title: self.title.clone(),
            magnet: self.magnet_uri.clone(),
            info_hash: self.info_hash.clone(),
            progress: self.progress,
            download_speed: self.download_speed.clone(),
            upload_speed: self.upload_speed.clone(),
            peers: self.peers,
            eta: self.eta.clone(),
            size_bytes: self.size_bytes,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// External mirror of [`TorrentSession`], serialized in the wire casing the
/// presentation layer expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session identifier.
    pub id: SessionId,
    /// Resolved torrent title, once metadata is known.
    pub title: Option<String>,
    /// Magnet URI the session was created from.
    pub magnet: String,
    /// Resolved info-hash, once metadata is known.
    pub info_hash: Option<String>,
    /// Progress percentage, rounded to two decimals.
    pub progress: f64,
    /// Canonical `"X.XX MB/s"` download speed.
    pub download_speed: String,
    /// Canonical `"X.XX MB/s"` upload speed.
    pub upload_speed: String,
    /// Connected peer count.
    pub peers: u32,
    /// Engine-supplied ETA string.
    pub eta: Option<String>,
    /// Total payload size in bytes, once metadata is known.
    pub size_bytes: Option<u64>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}
