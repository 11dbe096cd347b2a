//! Room identifier and reservation token minting and validation.

use rand::RngExt;

const ROOM_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ROOM_ID_LEN: usize = 7;
const TOKEN_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const TOKEN_LEN: usize = 24;

/// Draws a 7-character room id uniformly from `[A-Z0-9]`.
///
/// Collisions are the caller's responsibility to detect and retry against the
/// room index; this function only produces the candidate string.
pub fn mint_room_id() -> String {
    random_string(ROOM_ID_ALPHABET, ROOM_ID_LEN)
}

/// Draws an opaque reservation token of at least 16 characters.
pub fn mint_reservation_token() -> String {
    random_string(TOKEN_ALPHABET, TOKEN_LEN)
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            // SAFETY: `idx` is produced by `random_range(0..len)`, so it is
            // always within [0, len).
            #[allow(clippy::indexing_slicing)]
            let ch = alphabet[idx] as char;
            ch
        })
        .collect()
}

/// Validates and normalizes a client-supplied `roomId`: trim, upper-case, then
/// match against `^[A-Z0-9]{6,12}$`. Returns `None` on failure.
#[must_use]
pub fn normalize_room_id(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_ascii_uppercase();
    let len = candidate.chars().count();
    if !(6..=12).contains(&len) {
        return None;
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return None;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn mint_room_id_has_expected_shape() {
        for _ in 0..50 {
            let id = mint_room_id();
            assert_eq!(id.chars().count(), 7);
            assert!(normalize_room_id(&id).is_some());
        }
    }

    #[test]
    fn mint_reservation_token_is_long_and_opaque() {
        let token = mint_reservation_token();
        assert!(token.len() >= 16);
    }

    #[test]
    fn normalize_room_id_trims_and_uppercases() {
        assert_eq!(normalize_room_id("  abc123  "), Some("ABC123".to_string()));
    }

    #[test]
    fn normalize_room_id_rejects_bad_length() {
        assert_eq!(normalize_room_id("ABCD"), None);
        assert_eq!(normalize_room_id("ABCDEFGHIJKLM"), None);
    }

    #[test]
    fn normalize_room_id_rejects_non_alphanumeric() {
        assert_eq!(normalize_room_id("ABC-123"), None);
        assert_eq!(normalize_room_id(""), None);
    }

    /// Reference predicate mirroring the spec's `^[A-Z0-9]{6,12}$` grammar,
    /// checked independently against the trim/uppercase/match implementation.
    fn expected_room_id_ok(raw: &str) -> bool {
        let candidate = raw.trim().to_ascii_uppercase();
        let len = candidate.chars().count();
        (6..=12).contains(&len) && candidate.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    }

    proptest! {
        #[test]
        fn normalize_room_id_matches_reference_predicate(raw in proptest::collection::vec(any::<char>(), 0..=20)) {
            let candidate: String = raw.into_iter().collect();
            prop_assert_eq!(normalize_room_id(&candidate).is_some(), expected_room_id_ok(&candidate));
        }
    }
}
