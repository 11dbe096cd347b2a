//! Router assembly: `/ws` plus the observability and admin endpoints, all on
//! the same port.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use super::admin::{admin_quarantine, admin_status};
use super::handler::websocket_handler;
use super::health::health;
use super::prometheus::prometheus_metrics;
use crate::server::AppState;

pub fn create_router(cors_origins: &str) -> Router<Arc<AppState>> {
    use tower_http::cors::{Any, CorsLayer};

    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("no valid CORS origins configured, falling back to permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        }
    };

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/admin/status", get(admin_status))
        .route("/admin/quarantine", get(admin_quarantine))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
