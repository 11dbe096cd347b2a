//! Wire protocol and room data model: identifiers, the `Room` state machine,
//! inbound/outbound message shapes, and the handler error taxonomy.

pub mod error;
pub mod ids;
pub mod messages;
pub mod room;

pub use error::HandlerError;
pub use ids::{mint_reservation_token, mint_room_id, normalize_room_id};
pub use messages::{ClientMessage, Envelope, RoomStatePayload, ServerMessage};
pub use room::{now_ms, resolve_theme, validate_data_url, Phase, Reservation, Room, FPS, FRAME_COUNT};
