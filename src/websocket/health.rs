//! `/health` and `/healthz`: a health snapshot, content-negotiated between
//! JSON (default) and an HTML rendering.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSnapshot {
    uptime_ms: i64,
    connections: u64,
    rooms_indexed: u64,
    rooms_on_disk: u64,
    rooms_cached: u64,
    backups_run: u64,
    quarantined_rooms: u64,
    dirty_rooms: u64,
    data_dir: String,
    last_error: Option<crate::server::LastError>,
    memory_rss_bytes: u64,
    counters: crate::metrics::MetricsSnapshot,
}

async fn snapshot(state: &AppState) -> HealthSnapshot {
    let counters = state.metrics.snapshot();
    let rooms_indexed = state.index_len().await as u64;
    let rooms_on_disk = crate::persistence::count_rooms_on_disk(state.store.data_dir())
        .await
        .unwrap_or(rooms_indexed);
    HealthSnapshot {
        uptime_ms: crate::protocol::now_ms() - state.started_at(),
        connections: counters.connections_active,
        rooms_indexed,
        rooms_on_disk,
        rooms_cached: state.store.cached_room_count().await as u64,
        backups_run: counters.backups_run,
        quarantined_rooms: state.quarantine_len().await as u64,
        dirty_rooms: state.dirty_len().await as u64,
        data_dir: state.store.data_dir().display().to_string(),
        last_error: state.last_error().await,
        memory_rss_bytes: read_rss_bytes(),
        counters,
    }
}

/// Best-effort resident set size from `/proc/self/statm`; returns `0` where
/// that file doesn't exist (non-Linux).
pub fn read_rss_bytes() -> u64 {
    let Ok(contents) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let page_size = 4096u64;
    contents
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * page_size)
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    format: Option<String>,
}

fn wants_html(headers: &HeaderMap, format: Option<&str>) -> bool {
    if format == Some("html") {
        return true;
    }
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html") && !accept.contains("application/json"))
}

pub async fn health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HealthQuery>,
) -> impl IntoResponse {
    let snapshot = snapshot(&state).await;

    if wants_html(&headers, query.format.as_deref()) {
        let body = format!(
            "<html><body><h1>frameyard</h1><ul><li>uptimeMs: {}</li><li>connections: {}</li>\
             <li>roomsIndexed: {}</li><li>roomsCached: {}</li><li>quarantinedRooms: {}</li>\
             <li>dirtyRooms: {}</li><li>dataDir: {}</li></ul></body></html>",
            snapshot.uptime_ms,
            snapshot.connections,
            snapshot.rooms_indexed,
            snapshot.rooms_cached,
            snapshot.quarantined_rooms,
            snapshot.dirty_rooms,
            snapshot.data_dir,
        );
        Html(body).into_response()
    } else {
        Json(snapshot).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_html_respects_format_param() {
        let headers = HeaderMap::new();
        assert!(wants_html(&headers, Some("html")));
        assert!(!wants_html(&headers, Some("json")));
        assert!(!wants_html(&headers, None));
    }

    #[test]
    fn wants_html_respects_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ACCEPT, "text/html".parse().unwrap());
        assert!(wants_html(&headers, None));
    }
}
