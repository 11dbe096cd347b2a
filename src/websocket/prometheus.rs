//! `/metrics`: Prometheus text-exposition format.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::server::AppState;

pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus(
        state.store.cached_room_count().await as u64,
        state.index_len().await as u64,
        state.quarantine_len().await as u64,
        state.dirty_len().await as u64,
        crate::websocket::health::read_rss_bytes(),
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
