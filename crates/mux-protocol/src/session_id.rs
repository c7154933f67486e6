//! Session id generation and wire encoding (§6.5).
//!
//! Ids are 8 characters from `[A-Za-z0-9_-]`, generated with a
//! cryptographically strong RNG (nanoid's default generator draws from
//! `getrandom`). New sessions always produce exactly 8 characters, so the
//! header's zero-padding rule is a read-side accommodation for shorter ids
//! from other systems, never something we emit ourselves.

const ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9', '_', '-',
];

pub const SESSION_ID_LEN: usize = 8;

/// Generate a new session id: 8 characters from `[A-Za-z0-9_-]`.
pub fn generate_session_id() -> String {
    nanoid::nanoid!(SESSION_ID_LEN, &ALPHABET)
}

/// Encode a session id into the fixed 8-byte ASCII wire form, zero-padded on
/// the right if shorter than 8 bytes.
pub fn encode_session_id(id: &str) -> [u8; SESSION_ID_LEN] {
    let mut out = [0u8; SESSION_ID_LEN];
    let bytes = id.as_bytes();
    let n = bytes.len().min(SESSION_ID_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Decode the fixed 8-byte wire form back into a session id string, trimming
/// trailing zero padding. Returns `None` (the "no session" sentinel) when
/// all bytes are zero.
pub fn decode_session_id(raw: &[u8; SESSION_ID_LEN]) -> Option<String> {
    if raw.iter().all(|&b| b == 0) {
        return None;
    }
    let end = raw.iter().position(|&b| b == 0).unwrap_or(SESSION_ID_LEN);
    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_have_expected_length_and_alphabet() {
        let id = generate_session_id();
        assert_eq!(id.chars().count(), SESSION_ID_LEN);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn generated_ids_are_not_trivially_colliding() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            seen.insert(generate_session_id());
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn round_trips_full_length_id() {
        let id = "aB3_-xY9";
        let encoded = encode_session_id(id);
        assert_eq!(decode_session_id(&encoded).as_deref(), Some(id));
    }

    #[test]
    fn zero_id_decodes_to_none() {
        let encoded = [0u8; SESSION_ID_LEN];
        assert_eq!(decode_session_id(&encoded), None);
    }

    #[test]
    fn short_id_is_zero_padded_and_trimmed_on_decode() {
        let encoded = encode_session_id("ab");
        assert_eq!(&encoded, b"ab\0\0\0\0\0\0");
        assert_eq!(decode_session_id(&encoded).as_deref(), Some("ab"));
    }
}
