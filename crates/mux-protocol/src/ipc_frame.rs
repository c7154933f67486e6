//! Codec for the PTY host IPC frame format (§6.3).
//!
//! Frame layout: `[type: u8][payloadLen: u24 BE][payload: payloadLen]`.
//! Like the mux frame codec, this module is pure: callers own the actual
//! socket reads and feed accumulated bytes through [`try_parse`].

use thiserror::Error;

pub const HEADER_LEN: usize = 1 + 3;
pub const MAX_PAYLOAD: usize = 1024 * 1024;

pub mod msg_type {
    pub const INFO_REQUEST: u8 = 0x01;
    pub const INFO: u8 = 0x02;
    pub const INPUT: u8 = 0x03;
    pub const OUTPUT: u8 = 0x04;
    pub const RESIZE: u8 = 0x05;
    pub const RESIZE_ACK: u8 = 0x06;
    pub const GET_BUFFER: u8 = 0x07;
    pub const BUFFER: u8 = 0x08;
    pub const SET_NAME: u8 = 0x09;
    pub const SET_NAME_ACK: u8 = 0x0A;
    pub const CLOSE: u8 = 0x0B;
    pub const CLOSE_ACK: u8 = 0x0C;
    pub const STATE_CHANGE: u8 = 0x0D;
    pub const PING: u8 = 0x10;
    pub const PONG: u8 = 0x11;
    pub const ERROR: u8 = 0x7F;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcFrameError {
    #[error("ipc payload of {0} bytes exceeds the {MAX_PAYLOAD} byte maximum")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcFrame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl IpcFrame {
    pub fn new(msg_type: u8, payload: Vec<u8>) -> Result<Self, IpcFrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(IpcFrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { msg_type, payload })
    }

    pub fn empty(msg_type: u8) -> Self {
        Self {
            msg_type,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u32;
        let len_bytes = len.to_be_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.msg_type);
        out.extend_from_slice(&len_bytes[1..4]); // u24 BE: drop the top byte
        out.extend_from_slice(&self.payload);
        out
    }

    /// Try to parse one complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Returns the parsed
    /// frame plus the number of bytes consumed from `buf` on success.
    pub fn try_parse(buf: &[u8]) -> Result<Option<(IpcFrame, usize)>, IpcFrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let msg_type = buf[0];
        let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(IpcFrameError::PayloadTooLarge(len));
        }
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        Ok(Some((IpcFrame { msg_type, payload }, HEADER_LEN + len)))
    }
}
