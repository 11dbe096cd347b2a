//! Per-connection read/write loop: size-limited frame intake, the two-stage
//! verb parse, dispatch to the handler methods on [`AppState`], and a
//! dedicated send task so a slow reader never blocks a broadcast to other
//! connections in the same room.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, Envelope, HandlerError, ServerMessage};
use crate::server::AppState;

const KNOWN_VERBS: &[&str] = &[
    "hello",
    "resync",
    "get_frame",
    "create_public_and_submit",
    "join_random",
    "join_by_id",
    "join_room",
    "submit_frame",
];

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let conn_id = state.next_conn_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Envelope>>();

    state.register_connection(conn_id, tx.clone()).await;

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&*envelope) else {
                continue;
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let welcome = Arc::new(Envelope::new(state.hello()));
    let _ = tx.send(welcome);

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if text.len() > state.config.protocol.max_message_size {
            let frame = HandlerError::Validation("message too large".to_string()).into_frame();
            let _ = tx.send(Arc::new(Envelope::new(frame)));
            continue;
        }

        if let Some(reply) = dispatch(&state, addr, conn_id, &text).await {
            let _ = tx.send(Arc::new(Envelope::new(reply)));
        }
    }

    state.unregister_connection(conn_id).await;
    send_task.abort();
}

/// Parses and routes one inbound frame. Returns `None` when the frame should
/// be silently dropped (malformed data for a known verb, or a non-object
/// payload): the wire protocol only speaks up about unrecognized verbs, not
/// about junk masquerading as a message it recognizes.
async fn dispatch(state: &AppState, addr: SocketAddr, conn_id: u64, text: &str) -> Option<ServerMessage> {
    let raw: Value = serde_json::from_str(text).ok()?;
    let verb = raw.get("t")?.as_str()?.to_string();

    if !KNOWN_VERBS.contains(&verb.as_str()) {
        state.metrics.unknown_verb_frames.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return Some(ServerMessage::error(None, format!("unknown message type: {verb}"), None));
    }

    let message: ClientMessage = match serde_json::from_value(raw) {
        Ok(message) => message,
        Err(_) => {
            state.metrics.malformed_frames.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return None;
        }
    };

    let now = crate::protocol::now_ms();
    if let Err(err) = state.rate_limiter.check(addr, message.verb(), now) {
        state.metrics.rate_limit_rejections.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let crate::rate_limit::RateLimitError::Exceeded { retry_after_ms } = err;
        return Some(HandlerError::RateLimited { retry_after_ms }.into_frame());
    }

    let verb = message.verb();
    let started = std::time::Instant::now();
    let outcome = route(state, conn_id, message).await;
    state
        .metrics
        .record_op_duration(verb, u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

    match outcome {
        Ok(reply) => reply,
        Err(err) => {
            if let HandlerError::Internal(source) = &err {
                tracing::error!(
                    event = "handler_internal_error",
                    verb,
                    error = %source,
                    "internal error handling message"
                );
                state
                    .record_internal_error("HANDLER_INTERNAL_ERROR", source.to_string())
                    .await;
            }
            Some(err.into_frame())
        }
    }
}

/// Routes one parsed verb to its handler. Returns `Ok(None)` only for
/// `get_frame` on an uncommitted frame, which is a deliberate silent drop
/// rather than an error.
async fn route(
    state: &AppState,
    conn_id: u64,
    message: ClientMessage,
) -> Result<Option<ServerMessage>, HandlerError> {
    match message {
        ClientMessage::Hello {} => Ok(Some(state.hello())),
        ClientMessage::Resync { room_id } => state.resync(conn_id, room_id.as_deref()).await.map(Some),
        ClientMessage::GetFrame { room_id, frame_index } => state.get_frame(&room_id, frame_index).await,
        ClientMessage::CreatePublicAndSubmit { theme, data_url } => state
            .create_public_and_submit(conn_id, theme.as_deref(), &data_url)
            .await
            .map(Some),
        ClientMessage::JoinRandom {} => state.join_random(conn_id).await.map(Some),
        ClientMessage::JoinById { room_id } => state.join_by_id(conn_id, &room_id).await.map(Some),
        ClientMessage::JoinRoom {
            room_id,
            view,
            reservation_token,
        } => state
            .join_room(conn_id, &room_id, view, reservation_token.as_deref())
            .await
            .map(Some),
        ClientMessage::SubmitFrame {
            room_id,
            frame_index,
            reservation_token,
            data_url,
        } => {
            state
                .submit_frame(&room_id, frame_index, &reservation_token, &data_url)
                .await?;
            Ok(Some(ServerMessage::Submitted {
                room_id,
                frame_index: usize::try_from(frame_index).unwrap_or_default(),
            }))
        }
    }
}
