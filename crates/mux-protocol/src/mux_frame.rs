//! Codec for the mux WebSocket wire format (§6.1).
//!
//! Pure functions only: no I/O, no state. Every message on `/ws/mux` is one
//! binary WebSocket message consisting of a 9-byte header (type byte + 8
//! ASCII session-id bytes, zero-padded) followed by a type-specific payload.

use crate::session_id::{decode_session_id, encode_session_id, SESSION_ID_LEN};
use thiserror::Error;

pub const HEADER_LEN: usize = 1 + SESSION_ID_LEN;

pub mod frame_type {
    pub const OUTPUT: u8 = 0x01;
    pub const INPUT: u8 = 0x02;
    pub const RESIZE: u8 = 0x03;
    pub const SESSION_STATE: u8 = 0x04;
    pub const RESYNC: u8 = 0x05;
    pub const BUFFER_REQUEST: u8 = 0x06;
    pub const COMPRESSED_OUTPUT: u8 = 0x07;
    pub const ACTIVE_SESSION_HINT: u8 = 0x08;
    pub const INIT: u8 = 0xFF;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MuxFrameError {
    #[error("frame too short: {0} bytes, header requires at least {HEADER_LEN}")]
    TooShort(usize),
    #[error("unknown mux frame type 0x{0:02x}")]
    UnknownType(u8),
    #[error("malformed payload for frame type 0x{0:02x}")]
    MalformedPayload(u8),
}

/// A fully decoded mux frame, session id already resolved to `None` for the
/// all-zero sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxFrame {
    Output {
        session_id: String,
        cols: u16,
        rows: u16,
        data: Vec<u8>,
    },
    Input {
        session_id: String,
        data: Vec<u8>,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    SessionState {
        session_id: String,
        created: bool,
    },
    Resync {
        session_id: String,
    },
    BufferRequest {
        session_id: String,
    },
    CompressedOutput {
        session_id: String,
        cols: u16,
        rows: u16,
        uncompressed_len: u32,
        gzip: Vec<u8>,
    },
    ActiveSessionHint {
        session_id: Option<String>,
    },
    Init,
}

impl MuxFrame {
    pub fn frame_type(&self) -> u8 {
        match self {
            MuxFrame::Output { .. } => frame_type::OUTPUT,
            MuxFrame::Input { .. } => frame_type::INPUT,
            MuxFrame::Resize { .. } => frame_type::RESIZE,
            MuxFrame::SessionState { .. } => frame_type::SESSION_STATE,
            MuxFrame::Resync { .. } => frame_type::RESYNC,
            MuxFrame::BufferRequest { .. } => frame_type::BUFFER_REQUEST,
            MuxFrame::CompressedOutput { .. } => frame_type::COMPRESSED_OUTPUT,
            MuxFrame::ActiveSessionHint { .. } => frame_type::ACTIVE_SESSION_HINT,
            MuxFrame::Init => frame_type::INIT,
        }
    }

    fn header_session_id(&self) -> &str {
        match self {
            MuxFrame::Output { session_id, .. }
            | MuxFrame::Input { session_id, .. }
            | MuxFrame::Resize { session_id, .. }
            | MuxFrame::SessionState { session_id, .. }
            | MuxFrame::Resync { session_id }
            | MuxFrame::BufferRequest { session_id }
            | MuxFrame::CompressedOutput { session_id, .. } => session_id,
            MuxFrame::ActiveSessionHint { session_id } => {
                session_id.as_deref().unwrap_or("")
            }
            MuxFrame::Init => "",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.push(self.frame_type());
        out.extend_from_slice(&encode_session_id(self.header_session_id()));

        match self {
            MuxFrame::Output { cols, rows, data, .. } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(data);
            }
            MuxFrame::Input { data, .. } => out.extend_from_slice(data),
            MuxFrame::Resize { cols, rows, .. } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
            }
            MuxFrame::SessionState { created, .. } => out.push(u8::from(*created)),
            MuxFrame::Resync { .. } | MuxFrame::BufferRequest { .. } | MuxFrame::Init => {}
            MuxFrame::CompressedOutput {
                cols,
                rows,
                uncompressed_len,
                gzip,
                ..
            } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(&uncompressed_len.to_le_bytes());
                out.extend_from_slice(gzip);
            }
            MuxFrame::ActiveSessionHint { .. } => {}
        }
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, MuxFrameError> {
        if raw.len() < HEADER_LEN {
            return Err(MuxFrameError::TooShort(raw.len()));
        }
        let ty = raw[0];
        let mut id_bytes = [0u8; SESSION_ID_LEN];
        id_bytes.copy_from_slice(&raw[1..HEADER_LEN]);
        let payload = &raw[HEADER_LEN..];

        match ty {
            frame_type::OUTPUT => {
                let (cols, rows) = read_cols_rows(payload).ok_or(MuxFrameError::MalformedPayload(ty))?;
                Ok(MuxFrame::Output {
                    session_id: require_id(&id_bytes, ty)?,
                    cols,
                    rows,
                    data: payload[4..].to_vec(),
                })
            }
            frame_type::INPUT => Ok(MuxFrame::Input {
                session_id: require_id(&id_bytes, ty)?,
                data: payload.to_vec(),
            }),
            frame_type::RESIZE => {
                if payload.len() != 4 {
                    return Err(MuxFrameError::MalformedPayload(ty));
                }
                let (cols, rows) = read_cols_rows(payload).ok_or(MuxFrameError::MalformedPayload(ty))?;
                Ok(MuxFrame::Resize {
                    session_id: require_id(&id_bytes, ty)?,
                    cols,
                    rows,
                })
            }
            frame_type::SESSION_STATE => {
                if payload.len() != 1 {
                    return Err(MuxFrameError::MalformedPayload(ty));
                }
                Ok(MuxFrame::SessionState {
                    session_id: require_id(&id_bytes, ty)?,
                    created: payload[0] != 0,
                })
            }
            frame_type::RESYNC => Ok(MuxFrame::Resync {
                session_id: require_id(&id_bytes, ty)?,
            }),
            frame_type::BUFFER_REQUEST => Ok(MuxFrame::BufferRequest {
                session_id: require_id(&id_bytes, ty)?,
            }),
            frame_type::COMPRESSED_OUTPUT => {
                if payload.len() < 8 {
                    return Err(MuxFrameError::MalformedPayload(ty));
                }
                let (cols, rows) = read_cols_rows(payload).ok_or(MuxFrameError::MalformedPayload(ty))?;
                let uncompressed_len = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                Ok(MuxFrame::CompressedOutput {
                    session_id: require_id(&id_bytes, ty)?,
                    cols,
                    rows,
                    uncompressed_len,
                    gzip: payload[8..].to_vec(),
                })
            }
            frame_type::ACTIVE_SESSION_HINT => Ok(MuxFrame::ActiveSessionHint {
                session_id: decode_session_id(&id_bytes),
            }),
            frame_type::INIT => Ok(MuxFrame::Init),
            other => Err(MuxFrameError::UnknownType(other)),
        }
    }
}

fn read_cols_rows(payload: &[u8]) -> Option<(u16, u16)> {
    if payload.len() < 4 {
        return None;
    }
    let cols = u16::from_le_bytes(payload[0..2].try_into().ok()?);
    let rows = u16::from_le_bytes(payload[2..4].try_into().ok()?);
    Some((cols, rows))
}

/// Most frame types carry a concrete session id in the header; this
/// tolerates the zero sentinel decoding to an empty string rather than
/// failing, since callers that care about "no session" use
/// `ActiveSessionHint`'s `Option` directly.
fn require_id(raw: &[u8; SESSION_ID_LEN], ty: u8) -> Result<String, MuxFrameError> {
    decode_session_id(raw).ok_or(MuxFrameError::MalformedPayload(ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: MuxFrame) {
        let encoded = frame.encode();
        let decoded = MuxFrame::decode(&encoded).expect("decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_output() {
        round_trip(MuxFrame::Output {
            session_id: "abcd1234".into(),
            cols: 80,
            rows: 24,
            data: b"hello\n".to_vec(),
        });
    }

    #[test]
    fn round_trips_input() {
        round_trip(MuxFrame::Input {
            session_id: "abcd1234".into(),
            data: b"ls\n".to_vec(),
        });
    }

    #[test]
    fn round_trips_resize() {
        round_trip(MuxFrame::Resize {
            session_id: "abcd1234".into(),
            cols: 120,
            rows: 40,
        });
    }

    #[test]
    fn round_trips_session_state() {
        round_trip(MuxFrame::SessionState {
            session_id: "abcd1234".into(),
            created: true,
        });
        round_trip(MuxFrame::SessionState {
            session_id: "abcd1234".into(),
            created: false,
        });
    }

    #[test]
    fn round_trips_resync_and_buffer_request() {
        round_trip(MuxFrame::Resync {
            session_id: "abcd1234".into(),
        });
        round_trip(MuxFrame::BufferRequest {
            session_id: "abcd1234".into(),
        });
    }

    #[test]
    fn round_trips_compressed_output() {
        round_trip(MuxFrame::CompressedOutput {
            session_id: "abcd1234".into(),
            cols: 80,
            rows: 24,
            uncompressed_len: 2200,
            gzip: vec![0x1f, 0x8b, 1, 2, 3],
        });
    }

    #[test]
    fn round_trips_active_session_hint_with_and_without_id() {
        round_trip(MuxFrame::ActiveSessionHint {
            session_id: Some("abcd1234".into()),
        });
        round_trip(MuxFrame::ActiveSessionHint { session_id: None });
    }

    #[test]
    fn round_trips_init() {
        round_trip(MuxFrame::Init);
    }

    #[test]
    fn init_frame_has_all_zero_session_id() {
        let encoded = MuxFrame::Init.encode();
        assert_eq!(&encoded[1..HEADER_LEN], &[0u8; SESSION_ID_LEN]);
        assert_eq!(encoded[0], frame_type::INIT);
    }

    #[test]
    fn rejects_short_frames() {
        for len in 0..HEADER_LEN {
            let raw = vec![0u8; len];
            assert_eq!(MuxFrame::decode(&raw), Err(MuxFrameError::TooShort(len)));
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let mut raw = vec![0u8; HEADER_LEN];
        raw[0] = 0x42;
        assert_eq!(MuxFrame::decode(&raw), Err(MuxFrameError::UnknownType(0x42)));
    }

    #[test]
    fn fuzz_random_headers_never_panic() {
        // Deterministic pseudo-random bytes; the point is decode() never panics.
        let mut state: u64 = 0x9E3779B97F4A7C15;
        for _ in 0..10_000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let len = 9 + (state % 56) as usize;
            let mut raw = vec![0u8; len];
            for b in raw.iter_mut() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                *b = (state >> 33) as u8;
            }
            let _ = MuxFrame::decode(&raw);
        }
    }
}
