//! Session Manager (§4.E): the registry every other component reaches
//! through. Owns one pty-host child process and one `HostIpcClient` per
//! live session, and the single-reader output channel that funnels every
//! session's bytes into the Mux Broadcaster in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mux_protocol::{generate_session_id, SessionInfo};
use tokio::process::Command;
use tokio::sync::{mpsc, RwLock};

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::ipc_client::HostIpcClient;
use crate::mux::broadcaster::MuxBroadcaster;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct SessionRecord {
    info: RwLock<SessionInfo>,
    ipc: HostIpcClient,
    #[allow(dead_code)] // kept alive so the pty-host process isn't reaped early
    child: tokio::process::Child,
}

pub struct SessionManager {
    sessions: DashMap<String, Arc<SessionRecord>>,
    listeners: DashMap<u64, mpsc::UnboundedSender<Vec<SessionInfo>>>,
    next_listener_id: AtomicU64,
    output_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    state_tx: mpsc::UnboundedSender<String>,
    reconnect_tx: mpsc::UnboundedSender<String>,
    broadcaster: Arc<MuxBroadcaster>,
    config: Arc<ServerConfig>,
}

impl SessionManager {
    pub fn new(config: Arc<ServerConfig>, broadcaster: Arc<MuxBroadcaster>) -> Arc<Self> {
        let (output_tx, mut output_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let (state_tx, mut state_rx) = mpsc::unbounded_channel::<String>();
        let (reconnect_tx, mut reconnect_rx) = mpsc::unbounded_channel::<String>();

        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            output_tx,
            state_tx,
            reconnect_tx,
            broadcaster: Arc::clone(&broadcaster),
            config,
        });

        // Drains (sessionId, bytes) in arrival order and publishes
        // synchronously so per-session ordering survives the hop into the
        // multiplexer (§4.E "Output routing").
        let broadcast_for_output = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            while let Some((session_id, bytes)) = output_rx.recv().await {
                broadcast_for_output.publish_output(&session_id, bytes).await;
            }
        });

        let manager_for_state = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(session_id) = state_rx.recv().await {
                manager_for_state.refresh_from_host(&session_id).await;
            }
        });

        // Testable Property #4 (§4.D, §8 scenario 4): once the Host IPC
        // Client redials a dropped pty-host connection, re-fetch its info
        // and buffer and tell every viewer to resync, since whatever was
        // queued during the outage may no longer reflect reality.
        let manager_for_reconnect = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(session_id) = reconnect_rx.recv().await {
                manager_for_reconnect.handle_reconnect(&session_id).await;
            }
        });

        manager
    }

    pub async fn create_session(
        &self,
        cols: u16,
        rows: u16,
        shell: Option<String>,
        cwd: Option<String>,
    ) -> Result<SessionInfo, RelayError> {
        let shell = shell.unwrap_or_else(|| self.config.default_shell.clone());

        let mut session_id = generate_session_id();
        while self.sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }

        let mut cmd = Command::new(self.config.pty_host_binary());
        cmd.arg("--session-id")
            .arg(&session_id)
            .arg("--shell")
            .arg(&shell)
            .arg("--cols")
            .arg(cols.to_string())
            .arg("--rows")
            .arg(rows.to_string())
            .arg("--scrollback-bytes")
            .arg(self.config.scrollback_bytes.to_string());
        if let Some(cwd) = &cwd {
            cmd.arg("--cwd").arg(cwd);
        }
        cmd.kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|e| RelayError::Unavailable(format!("failed to spawn pty-host: {e}")))?;

        let socket_path = mux_protocol::unix_socket_path(&session_id);
        wait_for_socket(&socket_path, HANDSHAKE_TIMEOUT).await?;

        let (ipc, info_json) = HostIpcClient::connect(
            session_id.clone(),
            &socket_path,
            HANDSHAKE_TIMEOUT,
            self.output_tx.clone(),
            self.state_tx.clone(),
            self.reconnect_tx.clone(),
        )
        .await?;

        let info: SessionInfo = serde_json::from_value(info_json)
            .map_err(|e| RelayError::Unavailable(format!("malformed initial Info: {e}")))?;

        let record = Arc::new(SessionRecord {
            info: RwLock::new(info.clone()),
            ipc,
            child,
        });
        self.sessions.insert(session_id, record);
        self.notify_listeners().await;
        Ok(info)
    }

    /// Clones the `Arc<SessionRecord>` out of the map and drops the
    /// DashMap shard guard immediately — callers then hold only an `Arc`
    /// across their own `.await` points, never the guard itself.
    fn record(&self, id: &str) -> Option<Arc<SessionRecord>> {
        self.sessions.get(id).map(|r| Arc::clone(r.value()))
    }

    pub async fn get_session(&self, id: &str) -> Option<SessionInfo> {
        let record = self.record(id)?;
        let info = record.info.read().await.clone();
        Some(info)
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn snapshot_all(&self) -> Vec<SessionInfo> {
        let records: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(record.info.read().await.clone());
        }
        out
    }

    pub async fn close_session(&self, id: &str) {
        if let Some((_, record)) = self.sessions.remove(id) {
            let _ = record.ipc.close().await;
        }
        self.notify_listeners().await;
    }

    /// The "active viewer wins" rule: a resize tagged with a viewer id that
    /// isn't the session's last-active viewer is rejected outright. A
    /// `None` viewer id (REST caller) is always accepted.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16, viewer_id: Option<&str>) -> Result<bool, RelayError> {
        let record = self.record(id).ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        if let Some(viewer_id) = viewer_id {
            let current = record.info.read().await.last_active_viewer_id.clone();
            if current.as_deref() != Some(viewer_id) {
                return Ok(false);
            }
        }
        if !record.ipc.is_healthy() {
            return Err(RelayError::Unavailable("pty-host connection is reconnecting".into()));
        }
        record.ipc.resize(cols, rows).await?;
        let mut info = record.info.write().await;
        info.cols = cols;
        info.rows = rows;
        drop(info);
        self.notify_listeners().await;
        Ok(true)
    }

    pub async fn send_input(&self, id: &str, bytes: Vec<u8>, viewer_id: Option<&str>) -> Result<(), RelayError> {
        let record = self.record(id).ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        if let Some(viewer_id) = viewer_id {
            record.info.write().await.last_active_viewer_id = Some(viewer_id.to_string());
        }
        if !record.ipc.is_healthy() {
            return Err(RelayError::Unavailable("pty-host connection is reconnecting".into()));
        }
        record.ipc.send_input(bytes).await
    }

    pub async fn get_buffer(&self, id: &str) -> Result<Vec<u8>, RelayError> {
        let record = self.record(id).ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        record.ipc.get_buffer().await
    }

    pub async fn set_name(&self, id: &str, name: Option<String>) -> Result<(), RelayError> {
        let record = self.record(id).ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        record.ipc.set_name(name.clone()).await?;
        record.info.write().await.name = name;
        self.notify_listeners().await;
        Ok(())
    }

    pub fn add_state_listener(&self) -> (u64, mpsc::UnboundedReceiver<Vec<SessionInfo>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, tx);
        (id, rx)
    }

    pub fn remove_state_listener(&self, id: u64) {
        self.listeners.remove(&id);
    }

    /// Best-effort fan-out: a listener whose receiver was dropped is
    /// pruned, but that never stops delivery to the rest (§4.E).
    async fn notify_listeners(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot_all().await;
        let dead: Vec<u64> = self
            .listeners
            .iter()
            .filter_map(|e| {
                if e.value().send(snapshot.clone()).is_err() {
                    Some(*e.key())
                } else {
                    None
                }
            })
            .collect();
        for id in dead {
            self.listeners.remove(&id);
        }
    }

    async fn refresh_from_host(&self, session_id: &str) {
        let Some(record) = self.record(session_id) else {
            return;
        };
        if let Ok(info_json) = record.ipc.get_info().await {
            if let Ok(info) = serde_json::from_value::<SessionInfo>(info_json) {
                *record.info.write().await = info;
            }
        }
        self.notify_listeners().await;
    }

    /// Host IPC Client reconnect callback (§4.D, Testable Property #4): the
    /// connection to `session_id`'s pty-host came back up after an outage.
    /// Re-fetch its info and buffer to confirm the host is actually
    /// responsive again, then tell every viewer to resync — whatever the
    /// viewer already has may predate the gap.
    async fn handle_reconnect(&self, session_id: &str) {
        self.refresh_from_host(session_id).await;
        if let Some(record) = self.record(session_id) {
            if let Err(e) = record.ipc.get_buffer().await {
                tracing::warn!(session_id, error = %e, "post-reconnect GetBuffer failed");
                return;
            }
        }
        self.broadcaster.force_resync_all();
    }
}

async fn wait_for_socket(path: &std::path::Path, timeout: Duration) -> Result<(), RelayError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(RelayError::Unavailable("pty-host socket never appeared".into()))
}
