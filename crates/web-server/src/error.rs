//! Error taxonomy (§7). Library code returns this `thiserror` enum and
//! callers branch on `kind()`; `main` and axum handlers convert to a
//! response or an `anyhow::Error` at the boundary.

use mux_protocol::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session unavailable: {0}")]
    Unavailable(String),

    #[error("resize rejected: viewer is not the active viewer for this session")]
    ResizeRejected,

    #[error("ipc error: {0}")]
    Ipc(#[source] std::io::Error),

    #[error("ipc protocol error: {0}")]
    Protocol(#[from] mux_protocol::IpcFrameError),

    #[error("mux protocol error: {0}")]
    MuxProtocol(#[from] mux_protocol::MuxFrameError),

    #[error("websocket send failed: {0}")]
    WebSocketSend(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::SessionNotFound(_) => ErrorKind::Rejected,
            RelayError::Unavailable(_) => ErrorKind::Fatal,
            RelayError::ResizeRejected => ErrorKind::Rejected,
            RelayError::Ipc(_) => ErrorKind::Transient,
            RelayError::Protocol(_) => ErrorKind::Rejected,
            RelayError::MuxProtocol(_) => ErrorKind::Rejected,
            RelayError::WebSocketSend(_) => ErrorKind::Unhealthy,
        }
    }
}
