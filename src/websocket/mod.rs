//! WebSocket handling and the HTTP observability/admin surface, served from
//! the same port as the game protocol.
//!
//! - `handler`: the `/ws` upgrade entry point.
//! - `connection`: per-connection read/write loop and verb dispatch.
//! - `health`: `/health`, `/healthz`.
//! - `prometheus`: `/metrics`.
//! - `admin`: `/admin/status`, `/admin/quarantine`.
//! - `routes`: router assembly.

mod admin;
mod connection;
mod handler;
pub(crate) mod health;
mod prometheus;
mod routes;

pub use routes::create_router;
