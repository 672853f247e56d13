#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::redundant_pub_crate)]

//! Torrent session lifecycle management.
//!
//! Layout: `model.rs` (session entity and typed setters), `registry.rs`
//! (concurrent session map with per-entry locks), `bootstrap.rs` (overlay
//! readiness gate), `listener.rs` (engine event consumption), `reconcile.rs`
//! (external snapshot merging), `service.rs` (command dispatcher and the
//! exposed surface).

pub mod bootstrap;
mod deadline;
pub mod error;
pub mod listener;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod service;

pub use bootstrap::{BootstrapGate, BootstrapSettings};
pub use error::{SessionError, SessionResult};
pub use listener::spawn_listener;
pub use model::{SessionId, SessionView, TorrentSession, normalize_speed, validate_magnet};
pub use reconcile::{FieldMap, merge_snapshot, reconcile_from_engine, spawn_reconciler};
pub use registry::SessionRegistry;
pub use service::{SessionRuntimeConfig, SessionService};

pub use magnetar_events::SessionStatus;
