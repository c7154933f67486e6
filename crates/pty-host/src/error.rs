//! Error taxonomy for this binary. Library-style `thiserror` enum, mapped to
//! the shared `ErrorKind` at the boundaries that need to branch on it; the
//! `main` entry point itself reports failures through `anyhow`.

use mux_protocol::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum PtyHostError {
    #[error("failed to open pty: {0}")]
    PtyOpen(#[source] std::io::Error),

    #[error("failed to spawn shell: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("pty io error: {0}")]
    Io(#[source] std::io::Error),

    #[error("ipc socket bind failed at {path}: {source}")]
    SocketBind {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ipc frame: {0}")]
    Protocol(#[from] mux_protocol::IpcFrameError),

    #[error("resize rejected: session is not running")]
    ResizeRejected,

    #[error("platform not supported: {0}")]
    Platform(&'static str),
}

impl PtyHostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PtyHostError::PtyOpen(_) | PtyHostError::SpawnFailed(_) | PtyHostError::SocketBind { .. } => {
                ErrorKind::Fatal
            }
            PtyHostError::Io(_) => ErrorKind::Transient,
            PtyHostError::Protocol(_) => ErrorKind::Rejected,
            PtyHostError::ResizeRejected => ErrorKind::Rejected,
            PtyHostError::Platform(_) => ErrorKind::Fatal,
        }
    }
}
