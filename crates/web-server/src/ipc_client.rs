//! Host IPC Client (§4.D): one connection per live session, talking to the
//! pty-host over its Unix domain socket. Requests and responses share one
//! connection with unsolicited `Output`/`StateChange` frames, so a single
//! background reader dispatches those immediately and hands anything else
//! to whichever `request()` call is currently waiting.
//!
//! The connection is supervised: a lost socket or a missed heartbeat tears
//! down the reader/heartbeat pair for that connection and redials with
//! `mux_protocol::delay_for_attempt` backoff until the pty-host answers
//! again, reporting each success on `on_reconnected` so the Session Manager
//! can refresh its cached `SessionInfo` and tell viewers to resync.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use mux_protocol::{ipc_msg_type as msg_type, IpcFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::RelayError;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const PONG_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Missed pongs in a row before a connection is declared dead and
/// reconnect kicks in; tolerates one slow beat without flapping.
const MAX_CONSECUTIVE_MISSED_PONGS: u32 = 2;

type PendingSlot = Arc<StdMutex<Option<(u8, oneshot::Sender<IpcFrame>)>>>;

pub struct HostIpcClient {
    session_id: String,
    write_half: Arc<AsyncMutex<Option<OwnedWriteHalf>>>,
    pending: PendingSlot,
    request_lock: AsyncMutex<()>,
    healthy: Arc<AtomicBool>,
    supervisor_task: JoinHandle<()>,
}

impl Drop for HostIpcClient {
    fn drop(&mut self) {
        self.supervisor_task.abort();
    }
}

impl HostIpcClient {
    /// Connects, then performs the initial `GetInfo` handshake within
    /// `handshake_timeout`. `on_output` feeds the Session Manager's
    /// single-reader output channel; `on_state_changed` fires whenever the
    /// host reports its visible state changed; `on_reconnected` fires once
    /// per successful reconnect after the initial connection is lost.
    pub async fn connect(
        session_id: String,
        socket_path: &Path,
        handshake_timeout: Duration,
        on_output: mpsc::UnboundedSender<(String, Vec<u8>)>,
        on_state_changed: mpsc::UnboundedSender<String>,
        on_reconnected: mpsc::UnboundedSender<String>,
    ) -> Result<(Self, serde_json::Value), RelayError> {
        let (read_half, write_half_raw) = dial(socket_path, handshake_timeout).await?;

        let write_half = Arc::new(AsyncMutex::new(Some(write_half_raw)));
        let pending: PendingSlot = Arc::new(StdMutex::new(None));
        let healthy = Arc::new(AtomicBool::new(true));

        let supervisor_task = tokio::spawn(supervise(
            session_id.clone(),
            socket_path.to_path_buf(),
            handshake_timeout,
            read_half,
            Arc::clone(&write_half),
            Arc::clone(&pending),
            Arc::clone(&healthy),
            on_output,
            on_state_changed,
            on_reconnected,
        ));

        let client = Self {
            session_id: session_id.clone(),
            write_half,
            pending,
            request_lock: AsyncMutex::new(()),
            healthy,
            supervisor_task,
        };

        let info_frame = tokio::time::timeout(handshake_timeout, client.request(msg_type::INFO_REQUEST, Vec::new(), msg_type::INFO))
            .await
            .map_err(|_| RelayError::Unavailable("GetInfo handshake timed out".into()))??;
        let info: serde_json::Value = serde_json::from_slice(&info_frame.payload)
            .map_err(|e| RelayError::Unavailable(format!("malformed Info payload: {e}")))?;

        Ok((client, info))
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn send_input(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        self.write_frame(IpcFrame::new(msg_type::INPUT, bytes)?).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), RelayError> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&cols.to_be_bytes());
        payload.extend_from_slice(&rows.to_be_bytes());
        self.request(msg_type::RESIZE, payload, msg_type::RESIZE_ACK).await?;
        Ok(())
    }

    pub async fn get_buffer(&self) -> Result<Vec<u8>, RelayError> {
        let frame = self.request(msg_type::GET_BUFFER, Vec::new(), msg_type::BUFFER).await?;
        Ok(frame.payload)
    }

    pub async fn set_name(&self, name: Option<String>) -> Result<(), RelayError> {
        self.request(msg_type::SET_NAME, name.unwrap_or_default().into_bytes(), msg_type::SET_NAME_ACK)
            .await?;
        Ok(())
    }

    pub async fn get_info(&self) -> Result<serde_json::Value, RelayError> {
        let frame = self.request(msg_type::INFO_REQUEST, Vec::new(), msg_type::INFO).await?;
        serde_json::from_slice(&frame.payload).map_err(|e| RelayError::Unavailable(format!("malformed Info payload: {e}")))
    }

    pub async fn close(&self) -> Result<(), RelayError> {
        self.request(msg_type::CLOSE, Vec::new(), msg_type::CLOSE_ACK).await?;
        Ok(())
    }

    async fn write_frame(&self, frame: IpcFrame) -> Result<(), RelayError> {
        let mut guard = self.write_half.lock().await;
        let Some(w) = guard.as_mut() else {
            return Err(RelayError::Unavailable("pty-host connection is reconnecting".into()));
        };
        w.write_all(&frame.encode()).await.map_err(RelayError::Ipc)
    }

    /// Sends one request and awaits the next frame of `expected_type`,
    /// serialized by `request_lock` so at most one request is ever
    /// in-flight, per the correlation-less protocol's contract.
    async fn request(&self, req_type: u8, payload: Vec<u8>, expected_type: u8) -> Result<IpcFrame, RelayError> {
        let _guard = self.request_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap() = Some((expected_type, tx));
        if let Err(e) = self.write_frame(IpcFrame::new(req_type, payload)?).await {
            self.pending.lock().unwrap().take();
            return Err(e);
        }
        tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| RelayError::Unavailable("pty-host did not respond in time".into()))?
            .map_err(|_| RelayError::Unavailable("pty-host connection closed mid-request".into()))
    }
}

/// Dials the pty-host's Unix socket; used both for the initial connection
/// and every reconnect attempt.
async fn dial(socket_path: &Path, timeout: Duration) -> Result<(OwnedReadHalf, OwnedWriteHalf), RelayError> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(socket_path))
        .await
        .map_err(|_| RelayError::Unavailable("pty-host handshake timed out".into()))?
        .map_err(RelayError::Ipc)?;
    Ok(stream.into_split())
}

/// Owns the connection for this session's whole lifetime: runs the reader
/// and heartbeat for one connection attempt, and on disconnect redials with
/// backoff until the pty-host answers again, swapping the new halves into
/// the shared `write_half`/`pending` slots so `HostIpcClient`'s public API
/// never needs to know a reconnect happened.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    session_id: String,
    socket_path: PathBuf,
    handshake_timeout: Duration,
    mut read_half: OwnedReadHalf,
    write_half: Arc<AsyncMutex<Option<OwnedWriteHalf>>>,
    pending: PendingSlot,
    healthy: Arc<AtomicBool>,
    on_output: mpsc::UnboundedSender<(String, Vec<u8>)>,
    on_state_changed: mpsc::UnboundedSender<String>,
    on_reconnected: mpsc::UnboundedSender<String>,
) {
    let mut attempt = 0u32;
    loop {
        let (dead_tx, mut dead_rx) = mpsc::unbounded_channel::<()>();
        let last_pong = Arc::new(StdMutex::new(Instant::now()));

        let reader = tokio::spawn(reader_loop(
            read_half,
            Arc::clone(&pending),
            session_id.clone(),
            on_output.clone(),
            on_state_changed.clone(),
            Arc::clone(&last_pong),
            dead_tx.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&write_half), Arc::clone(&last_pong), Arc::clone(&healthy), dead_tx));

        // Either task sending here means the connection is dead; wait for
        // the first to notice rather than polling both.
        dead_rx.recv().await;
        reader.abort();
        heartbeat.abort();
        healthy.store(false, Ordering::SeqCst);
        *write_half.lock().await = None;
        if let Some((_, tx)) = pending.lock().unwrap().take() {
            drop(tx); // wake any in-flight request() with a closed-channel error
        }
        tracing::warn!(session_id = %session_id, "lost ipc connection to pty-host, reconnecting");

        read_half = loop {
            tokio::time::sleep(mux_protocol::delay_for_attempt(attempt)).await;
            match dial(&socket_path, handshake_timeout).await {
                Ok((r, w)) => {
                    *write_half.lock().await = Some(w);
                    break r;
                }
                Err(e) => {
                    attempt += 1;
                    tracing::debug!(session_id = %session_id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        };

        healthy.store(true, Ordering::SeqCst);
        attempt = 0;
        tracing::info!(session_id = %session_id, "ipc connection to pty-host restored");
        let _ = on_reconnected.send(session_id.clone());
    }
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    pending: PendingSlot,
    session_id: String,
    on_output: mpsc::UnboundedSender<(String, Vec<u8>)>,
    on_state_changed: mpsc::UnboundedSender<String>,
    last_pong: Arc<StdMutex<Instant>>,
    dead_tx: mpsc::UnboundedSender<()>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        loop {
            match IpcFrame::try_parse(&buf) {
                Ok(Some((frame, consumed))) => {
                    buf.drain(..consumed);
                    dispatch_inbound(frame, &pending, &session_id, &on_output, &on_state_changed, &last_pong);
                }
                Ok(None) => break,
                Err(_) => {
                    buf.clear();
                    break;
                }
            }
        }
    }
    let _ = dead_tx.send(());
}

fn dispatch_inbound(
    frame: IpcFrame,
    pending: &PendingSlot,
    session_id: &str,
    on_output: &mpsc::UnboundedSender<(String, Vec<u8>)>,
    on_state_changed: &mpsc::UnboundedSender<String>,
    last_pong: &Arc<StdMutex<Instant>>,
) {
    match frame.msg_type {
        msg_type::OUTPUT => {
            let _ = on_output.send((session_id.to_string(), frame.payload));
        }
        msg_type::STATE_CHANGE => {
            let _ = on_state_changed.send(session_id.to_string());
        }
        msg_type::PONG => {
            *last_pong.lock().unwrap() = Instant::now();
        }
        msg_type::ERROR => {
            tracing::warn!(session_id, message = %String::from_utf8_lossy(&frame.payload), "pty-host reported an error");
        }
        other => {
            let mut slot = pending.lock().unwrap();
            match slot.take() {
                Some((expected, tx)) if expected == other => {
                    let _ = tx.send(frame);
                }
                Some(waiting) => {
                    // Unexpected type while something else was awaited; put
                    // the waiter back and drop this frame.
                    *slot = Some(waiting);
                    tracing::debug!(session_id, got = other, "dropping unmatched ipc response");
                }
                None => {
                    tracing::debug!(session_id, got = other, "ipc response with no matching request");
                }
            }
        }
    }
}

/// Pings on `PING_INTERVAL` and waits `PONG_TIMEOUT` for a reply. A write
/// failure or `MAX_CONSECUTIVE_MISSED_PONGS` timeouts in a row signals the
/// connection dead on `dead_tx` and this task for this connection ends;
/// `supervise` spawns a fresh one once a reconnect succeeds.
async fn heartbeat_loop(
    write_half: Arc<AsyncMutex<Option<OwnedWriteHalf>>>,
    last_pong: Arc<StdMutex<Instant>>,
    healthy: Arc<AtomicBool>,
    dead_tx: mpsc::UnboundedSender<()>,
) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    let mut consecutive_misses = 0u32;
    loop {
        ticker.tick().await;
        let ping = IpcFrame::empty(msg_type::PING);
        let sent = {
            let mut guard = write_half.lock().await;
            match guard.as_mut() {
                Some(w) => w.write_all(&ping.encode()).await,
                None => Err(std::io::Error::other("not connected")),
            }
        };
        if sent.is_err() {
            healthy.store(false, Ordering::SeqCst);
            let _ = dead_tx.send(());
            return;
        }
        tokio::time::sleep(PONG_TIMEOUT).await;
        let elapsed = last_pong.lock().unwrap().elapsed();
        if elapsed < PING_INTERVAL + PONG_TIMEOUT {
            consecutive_misses = 0;
            healthy.store(true, Ordering::SeqCst);
            continue;
        }
        consecutive_misses += 1;
        healthy.store(false, Ordering::SeqCst);
        if consecutive_misses >= MAX_CONSECUTIVE_MISSED_PONGS {
            let _ = dead_tx.send(());
            return;
        }
    }
}
