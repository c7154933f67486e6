//! JSON-serializable session snapshot shared by the state WebSocket (§6.2)
//! and the PTY host IPC `Info` response (§6.3). One explicit struct with
//! `#[derive(Serialize, Deserialize)]` rather than a reflection-based
//! encoder, per §9's "reflection-free JSON" note.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub pid: u32,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(
        rename = "currentWorkingDirectory",
        skip_serializing_if = "Option::is_none"
    )]
    pub cwd: Option<String>,
    pub cols: u16,
    pub rows: u16,
    #[serde(rename = "shellType")]
    pub shell_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "lastActiveViewerId",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_active_viewer_id: Option<String>,
}

/// The outer envelope the state WebSocket (§6.2) pushes on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListMessage {
    pub sessions: SessionListPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListPayload {
    pub sessions: Vec<SessionInfo>,
}

impl SessionListMessage {
    pub fn new(sessions: Vec<SessionInfo>) -> Self {
        Self {
            sessions: SessionListPayload { sessions },
        }
    }
}
