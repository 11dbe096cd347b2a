//! Reservation engine: grants the sole right to commit a frame for a bounded
//! time window, and keeps the room's two reservation maps (`reservations` and
//! `reserved_by_frame`) consistent.

use crate::protocol::room::{Reservation, Room, FRAME_COUNT};

/// Reasons a reservation lookup or mint can fail, distinct from the
/// outward-facing `HandlerError` taxonomy so that callers can decide how to
/// word the response (e.g. `submit_frame` distinguishes mismatch from
/// expiry, while a join handler only cares whether a frame was available).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFault {
    NoEmptyFrame,
    NotFound,
    Expired,
    FrameMismatch,
}

/// Finds the first unreserved, uncommitted frame and mints a reservation for
/// it. Returns the token, frame index, and expiry on success.
pub fn reserve_any(
    room: &mut Room,
    now: i64,
    reservation_ms: u64,
) -> Result<(String, usize, i64), ReservationFault> {
    let frame_index = room
        .first_youngest_empty()
        .ok_or(ReservationFault::NoEmptyFrame)?;
    let token = reserve(room, frame_index, now, reservation_ms)?;
    let expires_at = now + i64::try_from(reservation_ms).unwrap_or(i64::MAX);
    Ok((token, frame_index, expires_at))
}

/// Mints a reservation for a specific frame index. Precondition: the frame
/// must be neither committed nor already reserved.
pub fn reserve(
    room: &mut Room,
    frame_index: usize,
    now: i64,
    reservation_ms: u64,
) -> Result<String, ReservationFault> {
    if frame_index >= FRAME_COUNT
        || room.committed[frame_index]
        || room.reserved_by_frame.contains_key(&frame_index)
    {
        return Err(ReservationFault::NoEmptyFrame);
    }
    let token = crate::protocol::ids::mint_reservation_token();
    let expires_at = now + i64::try_from(reservation_ms).unwrap_or(i64::MAX);
    room.reservations.push((
        token.clone(),
        Reservation {
            frame_index,
            expires_at,
        },
    ));
    room.reserved_by_frame.insert(frame_index, token.clone());
    Ok(token)
}

/// Looks up a reservation by token and checks it against `frame_index`
/// without mutating anything: present, unexpired, and recorded against the
/// requested frame. Split out from [`consume`] so a caller can front-load
/// reservation faults (missing/expired/mismatched token) ahead of an
/// unrelated "already submitted" check, matching the handler ordering that
/// checks the reservation before the frame's commit state.
pub fn validate(room: &Room, token: &str, frame_index: usize, now: i64) -> Result<(), ReservationFault> {
    let Some(reservation) = room
        .reservations
        .iter()
        .find(|(tok, _)| tok == token)
        .map(|(_, r)| *r)
    else {
        return Err(ReservationFault::NotFound);
    };

    if reservation.expires_at <= now {
        return Err(ReservationFault::Expired);
    }
    if reservation.frame_index != frame_index {
        return Err(ReservationFault::FrameMismatch);
    }
    Ok(())
}

/// Removes a reservation's entries from both maps. Precondition: [`validate`]
/// already succeeded for this `(token, frame_index)` pair.
pub fn remove(room: &mut Room, token: &str, frame_index: usize) {
    room.reservations.retain(|(tok, _)| tok != token);
    if room.reserved_by_frame.get(&frame_index) == Some(&token.to_string()) {
        room.reserved_by_frame.remove(&frame_index);
    }
}

/// Consumes a reservation: the token must be present, unexpired, and recorded
/// against `frame_index`. On success both maps are cleared of the entry.
pub fn consume(
    room: &mut Room,
    token: &str,
    frame_index: usize,
    now: i64,
) -> Result<(), ReservationFault> {
    validate(room, token, frame_index, now)?;
    remove(room, token, frame_index);
    Ok(())
}

/// Removes any reservation that is expired, whose frame has since been
/// committed, or whose frame index is out of range. Called at the start of
/// any handler that inspects or mutates reservations, and right after
/// deserialization. Idempotent.
pub fn sweep(room: &mut Room, now: i64) {
    room.reservations.retain(|(_, reservation)| {
        reservation.frame_index < FRAME_COUNT
            && reservation.expires_at > now
            && !room.committed[reservation.frame_index]
    });

    // The live mapping is authoritative for who owns a frame; any entry that
    // disagrees with `reservations` after the retain above is an orphan.
    let live_tokens: std::collections::HashSet<&str> =
        room.reservations.iter().map(|(tok, _)| tok.as_str()).collect();
    room.reserved_by_frame
        .retain(|_, tok| live_tokens.contains(tok.as_str()));

    room.rebuild_reserved_by_frame();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_room() -> Room {
        Room::new("ABC1234".to_string(), "theme".to_string(), 1000)
    }

    #[test]
    fn reserve_any_picks_first_empty_frame() {
        let mut room = fresh_room();
        let (token, idx, expires_at) = reserve_any(&mut room, 1000, 180_000).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(expires_at, 181_000);
        assert_eq!(room.reserved_by_frame.get(&0), Some(&token));
    }

    #[test]
    fn reserve_any_fails_when_all_frames_taken() {
        let mut room = fresh_room();
        room.committed = vec![true; FRAME_COUNT];
        assert_eq!(
            reserve_any(&mut room, 1000, 180_000),
            Err(ReservationFault::NoEmptyFrame)
        );
    }

    #[test]
    fn consume_succeeds_and_clears_both_maps() {
        let mut room = fresh_room();
        let (token, idx, _) = reserve_any(&mut room, 1000, 180_000).unwrap();
        consume(&mut room, &token, idx, 1500).unwrap();
        assert!(room.reservations.is_empty());
        assert!(room.reserved_by_frame.is_empty());
    }

    #[test]
    fn consume_fails_on_expiry() {
        let mut room = fresh_room();
        let (token, idx, expires_at) = reserve_any(&mut room, 1000, 180_000).unwrap();
        let result = consume(&mut room, &token, idx, expires_at + 1);
        assert_eq!(result, Err(ReservationFault::Expired));
    }

    #[test]
    fn consume_fails_on_frame_mismatch() {
        let mut room = fresh_room();
        let (token, _idx, _) = reserve_any(&mut room, 1000, 180_000).unwrap();
        let result = consume(&mut room, &token, 5, 1500);
        assert_eq!(result, Err(ReservationFault::FrameMismatch));
    }

    #[test]
    fn sweep_removes_expired_and_committed_reservations() {
        let mut room = fresh_room();
        reserve(&mut room, 0, 1000, 180_000).unwrap();
        reserve(&mut room, 1, 1000, 180_000).unwrap();
        room.committed[1] = true;
        sweep(&mut room, 181_100);
        assert!(room.reservations.is_empty());
        assert!(room.reserved_by_frame.is_empty());
    }

    #[test]
    fn sweep_is_idempotent() {
        let mut room = fresh_room();
        reserve(&mut room, 0, 1000, 180_000).unwrap();
        sweep(&mut room, 1500);
        let snapshot = room.reservations.clone();
        sweep(&mut room, 1500);
        assert_eq!(room.reservations, snapshot);
    }
}
