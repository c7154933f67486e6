//! Wire formats and small pure data structures shared between the web
//! server and the PTY host binary. Keeping this in its own crate is what
//! guarantees the two processes agree byte-for-byte on both the mux
//! WebSocket frame format and the PTY host IPC frame format.

mod backoff;
mod error;
mod ipc_endpoint;
mod ipc_frame;
mod mux_frame;
mod ring_buffer;
mod session_id;
mod session_info;
mod token_bucket;

pub use backoff::delay_for_attempt;
pub use error::ErrorKind;
pub use ipc_endpoint::unix_socket_path;
pub use ipc_frame::{msg_type as ipc_msg_type, IpcFrame, IpcFrameError, HEADER_LEN as IPC_HEADER_LEN, MAX_PAYLOAD as IPC_MAX_PAYLOAD};
pub use mux_frame::{frame_type as mux_frame_type, MuxFrame, MuxFrameError, HEADER_LEN as MUX_HEADER_LEN};
pub use ring_buffer::{CircularByteBuffer, RingBufferError};
pub use session_id::{decode_session_id, encode_session_id, generate_session_id, SESSION_ID_LEN};
pub use session_info::{SessionInfo, SessionListMessage, SessionListPayload};
pub use token_bucket::TokenBucket;
