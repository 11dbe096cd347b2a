//! Admin endpoints: extended status and quarantine mutation. Both are gated
//! by [`authorize`]; callers that fail authorization get the same 404 as an
//! undefined path, so unauthorized probing can't distinguish "wrong key"
//! from "no such route".

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::server::AppState;

fn is_localhost(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_loopback(),
        IpAddr::V6(ip) => ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

fn authorize(state: &AppState, addr: &SocketAddr, headers: &HeaderMap, query_key: Option<&str>) -> bool {
    match &state.config.admin.admin_key {
        Some(configured) => {
            let header_key = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
            query_key == Some(configured.as_str()) || header_key == Some(configured.as_str())
        }
        None => is_localhost(addr),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    key: Option<String>,
}

pub async fn admin_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !authorize(&state, &addr, &headers, query.key.as_deref()) {
        return Err(StatusCode::NOT_FOUND);
    }

    let snapshot = state.metrics.snapshot();
    Ok(Json(json!({
        "uptimeMs": crate::protocol::now_ms() - state.started_at(),
        "dataDir": state.store.data_dir().display().to_string(),
        "cachedRooms": state.store.cached_room_count().await,
        "indexedRooms": state.index_len().await,
        "quarantinedRooms": state.quarantine_len().await,
        "dirtyRooms": state.dirty_len().await,
        "counters": snapshot,
    })))
}

#[derive(Debug, Deserialize)]
pub struct QuarantineQuery {
    key: Option<String>,
    room_id: String,
    mode: String,
}

pub async fn admin_quarantine(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<QuarantineQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !authorize(&state, &addr, &headers, query.key.as_deref()) {
        return Err(StatusCode::NOT_FOUND);
    }

    let Some(room_id) = crate::protocol::normalize_room_id(&query.room_id) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let target = match query.mode.as_str() {
        "on" => true,
        "off" => false,
        "toggle" => !state.is_quarantined(&room_id).await,
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    match state.set_quarantine(&room_id, target).await {
        Ok(changed) => {
            tracing::info!(room_id = %room_id, quarantined = target, changed, "admin quarantine mutation");
            Ok(Json(json!({ "roomId": room_id, "quarantined": target })))
        }
        Err(err) => {
            tracing::error!(room_id = %room_id, error = %err, "failed to persist quarantine change");
            state
                .record_internal_error("QUARANTINE_SAVE_FAILED", err.to_string())
                .await;
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_localhost_accepts_loopback_addresses() {
        assert!(is_localhost(&"127.0.0.1:1234".parse().unwrap()));
        assert!(is_localhost(&"[::1]:1234".parse().unwrap()));
        assert!(!is_localhost(&"10.0.0.1:1234".parse().unwrap()));
    }
}
