//! Room data model: the 60-frame slate, its commit state, and the DRAWING/PLAYBACK
//! state machine.
//!
//! `Phase` is always a pure derivation of `committed` (see [`Room::normalize_phase`]);
//! the stored field exists only so the persisted JSON is self-describing, and callers
//! must re-derive it before trusting it for any decision.

use std::collections::HashMap;

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Every room has exactly this many frame slots.
pub const FRAME_COUNT: usize = 60;
/// Target playback rate, reported to clients in `room_state`.
pub const FPS: u32 = 12;

fn current_schema_version() -> u32 {
    1
}

/// Wall-clock milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Drawing,
    Playback,
}

/// A live reservation: the sole right to commit `frame_index` until `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub frame_index: usize,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub theme: String,
    pub frames: Vec<Option<String>>,
    pub committed: Vec<bool>,
    pub created_at: i64,
    pub updated_at: i64,
    pub phase: Phase,
    /// `(token, reservation)` pairs, matching the spec's on-disk shape of an
    /// array of two-element entries rather than an object keyed by token
    /// (tokens are opaque and not necessarily valid JSON object keys-safe
    /// across every consumer).
    pub reservations: Vec<(String, Reservation)>,
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    /// Inverse lookup, not persisted: rebuilt from `reservations` on every load.
    #[serde(skip)]
    pub reserved_by_frame: HashMap<usize, String>,
}

impl Room {
    #[must_use]
    pub fn new(room_id: String, theme: String, now: i64) -> Self {
        Self {
            room_id,
            theme,
            frames: vec![None; FRAME_COUNT],
            committed: vec![false; FRAME_COUNT],
            created_at: now,
            updated_at: now,
            phase: Phase::Drawing,
            reservations: Vec::new(),
            schema_version: current_schema_version(),
            reserved_by_frame: HashMap::new(),
        }
    }

    /// Rebuilds `reserved_by_frame` from `reservations`, keeping only the
    /// entry whose token matches the frame's live mapping (first-wins on
    /// duplicates, which `sweep` would remove anyway).
    pub fn rebuild_reserved_by_frame(&mut self) {
        self.reserved_by_frame.clear();
        for (token, reservation) in &self.reservations {
            self.reserved_by_frame
                .entry(reservation.frame_index)
                .or_insert_with(|| token.clone());
        }
    }

    #[must_use]
    pub fn filled_count(&self) -> usize {
        self.committed.iter().filter(|&&c| c).count()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.committed.iter().all(|&c| c)
    }

    /// Pure derivation of phase from `committed`; must be called before any
    /// external observation of `self.phase`.
    pub fn normalize_phase(&mut self) {
        self.phase = if self.is_completed() {
            Phase::Playback
        } else {
            Phase::Drawing
        };
    }

    /// The smallest frame index that is neither committed nor reserved, or
    /// `None` if every frame is committed or reserved.
    #[must_use]
    pub fn first_youngest_empty(&self) -> Option<usize> {
        (0..FRAME_COUNT).find(|idx| !self.committed[*idx] && !self.reserved_by_frame.contains_key(idx))
    }

    pub fn filled(&self) -> [bool; FRAME_COUNT] {
        let mut out = [false; FRAME_COUNT];
        for (i, c) in self.committed.iter().enumerate() {
            out[i] = *c;
        }
        out
    }
}

/// Validates a `dataUrl` payload bit-exactly per the external-interface contract:
/// must begin with the literal prefix `data:image/` and be no longer than
/// `max_bytes`. No further parsing is performed.
#[must_use]
pub fn validate_data_url(data_url: &str, max_bytes: usize) -> bool {
    data_url.starts_with("data:image/") && data_url.len() <= max_bytes
}

/// Picks a theme: the trimmed client-supplied value if non-blank, otherwise a
/// random pick from the configured fallback pool.
#[must_use]
pub fn resolve_theme(requested: Option<&str>, fallback_pool: &[String]) -> String {
    if let Some(theme) = requested.map(str::trim).filter(|t| !t.is_empty()) {
        return theme.to_string();
    }
    if fallback_pool.is_empty() {
        return "untitled".to_string();
    }
    let mut rng = rand::rng();
    let idx = rng.random_range(0..fallback_pool.len());
    // SAFETY: idx is produced by random_range(0..len), always in bounds.
    #[allow(clippy::indexing_slicing)]
    fallback_pool[idx].clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_room_starts_in_drawing_with_empty_slate() {
        let room = Room::new("ABC1234".to_string(), "theme".to_string(), 1000);
        assert_eq!(room.phase, Phase::Drawing);
        assert_eq!(room.frames.len(), FRAME_COUNT);
        assert_eq!(room.committed.len(), FRAME_COUNT);
        assert!(!room.is_completed());
        assert_eq!(room.filled_count(), 0);
    }

    #[test]
    fn normalize_phase_flips_to_playback_when_all_committed() {
        let mut room = Room::new("ABC1234".to_string(), "theme".to_string(), 1000);
        room.committed = vec![true; FRAME_COUNT];
        room.normalize_phase();
        assert_eq!(room.phase, Phase::Playback);
    }

    #[test]
    fn first_youngest_empty_skips_committed_and_reserved() {
        let mut room = Room::new("ABC1234".to_string(), "theme".to_string(), 1000);
        room.committed[0] = true;
        room.reserved_by_frame.insert(1, "tok".to_string());
        assert_eq!(room.first_youngest_empty(), Some(2));
    }

    #[test]
    fn validate_data_url_requires_prefix_and_size_bound() {
        assert!(validate_data_url("data:image/png;base64,AAAA", 1_500_000));
        assert!(!validate_data_url("data:text/plain,hi", 1_500_000));
        assert!(!validate_data_url(&"a".repeat(10), 1_500_000));
        let too_big = format!("data:image/{}", "a".repeat(2_000_000));
        assert!(!validate_data_url(&too_big, 1_500_000));
    }

    #[test]
    fn resolve_theme_prefers_explicit_nonblank_value() {
        let pool = vec!["fallback".to_string()];
        assert_eq!(resolve_theme(Some("  走る犬  "), &pool), "走る犬");
        assert_eq!(resolve_theme(Some("   "), &pool), "fallback");
        assert_eq!(resolve_theme(None, &pool), "fallback");
    }

    /// Reference predicate mirroring the bit-exact `dataUrl` contract: a
    /// literal `data:image/` prefix and a byte-length bound, checked
    /// independently against the implementation.
    fn expected_data_url_ok(raw: &str, max_bytes: usize) -> bool {
        raw.starts_with("data:image/") && raw.len() <= max_bytes
    }

    proptest! {
        #[test]
        fn validate_data_url_matches_reference_predicate(
            raw in "(data:image/)?[a-zA-Z0-9;,:/]{0,64}",
            max_bytes in 0usize..100,
        ) {
            prop_assert_eq!(validate_data_url(&raw, max_bytes), expected_data_url_ok(&raw, max_bytes));
        }
    }
}
