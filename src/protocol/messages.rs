//! Wire message shapes: the inbound `{t, data}` envelope and the outbound
//! `{v, t, ts, data}` envelope.

use serde::{Deserialize, Serialize};

use super::room::{now_ms, Phase, Room, FPS, FRAME_COUNT};

/// An inbound client message, tagged by its `t` field with the payload under `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {},
    #[serde(rename_all = "camelCase")]
    Resync {
        #[serde(default)]
        room_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetFrame { room_id: String, frame_index: i64 },
    #[serde(rename_all = "camelCase")]
    CreatePublicAndSubmit {
        #[serde(default)]
        theme: Option<String>,
        data_url: String,
    },
    JoinRandom {},
    #[serde(rename_all = "camelCase")]
    JoinById { room_id: String },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        view: bool,
        #[serde(default)]
        reservation_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SubmitFrame {
        room_id: String,
        frame_index: i64,
        reservation_token: String,
        data_url: String,
    },
}

impl ClientMessage {
    /// Stable verb name, used as the rate-limiter key and in logs. Matches
    /// the field names of `RateLimitConfig`.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Hello {} => "hello",
            Self::Resync { .. } => "resync",
            Self::GetFrame { .. } => "get_frame",
            Self::CreatePublicAndSubmit { .. } => "create_public_and_submit",
            Self::JoinRandom {} => "join_random",
            Self::JoinById { .. } => "join_by_id",
            Self::JoinRoom { .. } => "join_room",
            Self::SubmitFrame { .. } => "submit_frame",
        }
    }
}

/// An outbound server message, tagged the same way as `ClientMessage`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { protocol: u8, server_time: i64 },
    #[serde(rename_all = "camelCase")]
    CreatedPublic(RoomStatePayload),
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        theme: String,
        assigned_frame: usize,
        reservation_token: String,
        reservation_expires_at: i64,
        filled: Vec<bool>,
    },
    #[serde(rename_all = "camelCase")]
    RoomState(RoomStatePayload),
    #[serde(rename_all = "camelCase")]
    FrameData {
        room_id: String,
        frame_index: usize,
        data_url: String,
    },
    #[serde(rename_all = "camelCase")]
    FrameCommitted { room_id: String, frame_index: usize },
    #[serde(rename_all = "camelCase")]
    Submitted { room_id: String, frame_index: usize },
    #[serde(rename_all = "camelCase")]
    StartPlayback { room_id: String },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub room_id: String,
    pub theme: String,
    pub frame_count: usize,
    pub fps: u32,
    pub phase: Phase,
    pub created_at: i64,
    pub updated_at: i64,
    pub filled: Vec<bool>,
    pub completed: bool,
}

impl RoomStatePayload {
    #[must_use]
    pub fn from_room(room: &Room) -> Self {
        Self {
            room_id: room.room_id.clone(),
            theme: room.theme.clone(),
            frame_count: FRAME_COUNT,
            fps: FPS,
            phase: room.phase,
            created_at: room.created_at,
            updated_at: room.updated_at,
            filled: room.filled().to_vec(),
            completed: room.is_completed(),
        }
    }
}

impl ServerMessage {
    #[must_use]
    pub fn room_state(room: &Room) -> Self {
        Self::RoomState(RoomStatePayload::from_room(room))
    }

    #[must_use]
    pub fn created_public(room: &Room) -> Self {
        Self::CreatedPublic(RoomStatePayload::from_room(room))
    }

    #[must_use]
    pub fn error(code: Option<&str>, message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::Error {
            code: code.map(str::to_string),
            message: message.into(),
            retry_after_ms,
        }
    }
}

/// The outbound wire envelope: `{ v, t, ts, data }`. `ServerMessage` already
/// serializes as `{ t, data }`; flattening it into this wrapper adds the
/// sibling `v`/`ts` fields without a second tagged representation.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub v: u8,
    pub ts: i64,
    #[serde(flatten)]
    pub payload: ServerMessage,
}

impl Envelope {
    #[must_use]
    pub fn new(payload: ServerMessage) -> Self {
        Self {
            v: 1,
            ts: now_ms(),
            payload,
        }
    }
}
