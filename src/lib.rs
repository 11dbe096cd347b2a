#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Frameyard server
//!
//! Coordination server for a collaborative 60-frame animation game: rooms of
//! strangers each draw one frame, the server reserves frames, collects
//! submissions, and tells everyone attached to a room when to start
//! playback.

/// Server configuration: JSON file, stdin, and environment layering.
pub mod config;

/// Structured logging setup.
pub mod logging;

/// Process-wide counters and the Prometheus renderer.
pub mod metrics;

/// Wire protocol, room data model, and the handler error taxonomy.
pub mod protocol;

/// On-disk persistence: rooms, the index, quarantine, and backups.
pub mod persistence;

/// Per-`(peer, verb)` rate limiting.
pub mod rate_limit;

/// Reservation engine: frame grants with bounded lifetime.
pub mod reservation;

/// Main server orchestration: shared state and the message handlers.
pub mod server;

/// Bounded in-memory room cache with read-through to disk.
pub mod store;

/// WebSocket connection handling and the HTTP observability/admin surface.
pub mod websocket;
