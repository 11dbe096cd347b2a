//! Handler-facing error taxonomy. Every variant maps to exactly one outbound
//! `error` frame; nothing here ever terminates a connection on its own.

use thiserror::Error;

use super::messages::ServerMessage;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),

    /// Room absent, quarantined, or completed-but-requested-for-editing.
    /// Always surfaced with the same message, to avoid leaking which case applied.
    #[error("room not found")]
    NotFound,

    #[error("{0}")]
    Reservation(String),

    #[error("not accepting submissions")]
    Phase,

    #[error("already submitted")]
    Conflict,

    #[error("rate limited")]
    RateLimited { retry_after_ms: u64 },

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::RateLimited { .. } => Some("RATE_LIMIT"),
            _ => None,
        }
    }

    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Renders this error as the single outbound frame the caller must send.
    #[must_use]
    pub fn into_frame(self) -> ServerMessage {
        let code = self.code().map(str::to_string);
        let retry_after_ms = self.retry_after_ms();
        ServerMessage::Error {
            code,
            message: self.to_string(),
            retry_after_ms,
        }
    }
}
