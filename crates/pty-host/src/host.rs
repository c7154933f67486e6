//! The three concurrent activities described in §4.C: draining PTY output
//! into scrollback and the live client, reading and applying IPC frames
//! from that client, and pushing `StateChange` whenever the session's
//! visible state changes. The PTY itself lives on a dedicated task so input,
//! resize and terminate all funnel through one mailbox and never race.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mux_protocol::{ipc_msg_type as msg_type, CircularByteBuffer, IpcFrame, SessionInfo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

use crate::error::PtyHostError;
use crate::pty::{Pty, SpawnOptions};

const DISCONNECT_GRACE: Duration = Duration::from_secs(10);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

enum PtyCommand {
    Write(Vec<u8>),
    Resize(u16, u16),
    Terminate,
}

struct MutableState {
    cols: u16,
    rows: u16,
    name: Option<String>,
    last_active_viewer_id: Option<String>,
    exit_code: Option<i32>,
}

struct Shared {
    session_id: String,
    shell_type: String,
    cwd: Option<String>,
    created_at: u64,
    pid: u32,
    buffer: Mutex<CircularByteBuffer>,
    state: Mutex<MutableState>,
    running: AtomicBool,
    output_tx: broadcast::Sender<Vec<u8>>,
    state_change_tx: broadcast::Sender<()>,
    cmd_tx: mpsc::Sender<PtyCommand>,
}

impl Shared {
    fn snapshot_info(&self) -> SessionInfo {
        let state = self.state.lock().unwrap();
        SessionInfo {
            id: self.session_id.clone(),
            pid: self.pid,
            created_at: self.created_at,
            is_running: self.running.load(Ordering::SeqCst),
            exit_code: state.exit_code,
            cwd: self.cwd.clone(),
            cols: state.cols,
            rows: state.rows,
            shell_type: self.shell_type.clone(),
            name: state.name.clone(),
            last_active_viewer_id: state.last_active_viewer_id.clone(),
        }
    }

    fn notify_state_change(&self) {
        let _ = self.state_change_tx.send(());
    }
}

pub struct HostArgs {
    pub session_id: String,
    pub shell: String,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub scrollback_bytes: usize,
}

pub async fn run(args: HostArgs) -> Result<(), (PtyHostError, i32)> {
    let opts = SpawnOptions {
        shell: args.shell.clone(),
        args: Vec::new(),
        cwd: args.cwd.clone(),
        cols: args.cols,
        rows: args.rows,
        env: Vec::new(),
    };

    let pty = Pty::spawn(opts).map_err(|e| (e, 11))?;
    let pid = pty.pid();

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (output_tx, _) = broadcast::channel(256);
    let (state_change_tx, _) = broadcast::channel(16);

    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let shared = Arc::new(Shared {
        session_id: args.session_id.clone(),
        shell_type: args.shell.clone(),
        cwd: args.cwd.as_ref().map(|p| p.display().to_string()),
        created_at,
        pid,
        buffer: Mutex::new(CircularByteBuffer::new(args.scrollback_bytes.max(1)).expect("positive capacity")),
        state: Mutex::new(MutableState {
            cols: args.cols,
            rows: args.rows,
            name: None,
            last_active_viewer_id: None,
            exit_code: None,
        }),
        running: AtomicBool::new(true),
        output_tx,
        state_change_tx,
        cmd_tx,
    });

    let exit_code = Arc::new(AtomicI32::new(-1));
    let pump = tokio::spawn(run_pty_pump(pty, Arc::clone(&shared), cmd_rx, Arc::clone(&exit_code)));

    let socket_path = mux_protocol::unix_socket_path(&args.session_id);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            (
                PtyHostError::SocketBind {
                    path: socket_path.clone(),
                    source: e,
                },
                10,
            )
        })?;
    }
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).map_err(|e| {
        (
            PtyHostError::SocketBind {
                path: socket_path.clone(),
                source: e,
            },
            10,
        )
    })?;
    tracing::info!(path = %socket_path.display(), "pty host listening");

    loop {
        let accept = tokio::time::timeout(DISCONNECT_GRACE, listener.accept());
        match accept.await {
            Ok(Ok((stream, _addr))) => {
                handle_connection(stream, Arc::clone(&shared)).await;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "accept failed");
            }
            Err(_timeout) => {
                // No client reconnected within the grace window; exit once
                // the shell has already exited, otherwise keep waiting.
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
        if !shared.running.load(Ordering::SeqCst) {
            // Give a just-reconnected client a moment to read the final
            // state before tearing the process down.
            tokio::time::sleep(Duration::from_millis(250)).await;
            break;
        }
    }

    pump.abort();
    let _ = std::fs::remove_file(&socket_path);
    std::process::exit(exit_code.load(Ordering::SeqCst).max(0));
}

async fn run_pty_pump(
    mut pty: Pty,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<PtyCommand>,
    exit_code: Arc<AtomicI32>,
) {
    let mut buf = [0u8; 8192];
    let mut exit_check = tokio::time::interval(EXIT_POLL_INTERVAL);

    loop {
        tokio::select! {
            result = pty.read_output(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        shared.buffer.lock().unwrap().write(&chunk);
                        let _ = shared.output_tx.send(chunk);
                    }
                    Err(_) => break,
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(PtyCommand::Write(data)) => {
                        let _ = pty.write_input(&data).await;
                    }
                    Some(PtyCommand::Resize(cols, rows)) => {
                        if pty.resize(cols, rows).is_ok() {
                            let mut state = shared.state.lock().unwrap();
                            state.cols = cols;
                            state.rows = rows;
                            drop(state);
                            shared.notify_state_change();
                        }
                    }
                    Some(PtyCommand::Terminate) => {
                        pty.terminate();
                    }
                    None => break,
                }
            }
            _ = exit_check.tick() => {
                if let Some(code) = pty.try_wait_exit_code() {
                    shared.running.store(false, Ordering::SeqCst);
                    shared.state.lock().unwrap().exit_code = Some(code);
                    exit_code.store(0, Ordering::SeqCst);
                    shared.notify_state_change();
                    break;
                }
            }
        }
    }

    // Drain any remaining output the shell wrote before it exited.
    loop {
        match tokio::time::timeout(Duration::from_millis(50), pty.read_output(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let chunk = buf[..n].to_vec();
                shared.buffer.lock().unwrap().write(&chunk);
                let _ = shared.output_tx.send(chunk);
            }
            _ => break,
        }
    }
    if shared.running.swap(false, Ordering::SeqCst) {
        let mut code = None;
        for _ in 0..10 {
            if let Some(c) = pty.try_wait_exit_code() {
                code = Some(c);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shared.state.lock().unwrap().exit_code.get_or_insert(code.unwrap_or(0));
        exit_code.store(0, Ordering::SeqCst);
        shared.notify_state_change();
    }
}

async fn handle_connection(stream: UnixStream, shared: Arc<Shared>) {
    let (read_half, write_half) = stream.into_split();
    let write_half = Arc::new(AsyncMutex::new(write_half));
    let mut output_rx = shared.output_tx.subscribe();
    let mut state_rx = shared.state_change_tx.subscribe();
    let mut read_half = read_half;
    let mut inbuf: Vec<u8> = Vec::new();
    let mut read_chunk = [0u8; 4096];

    loop {
        tokio::select! {
            chunk = output_rx.recv() => {
                match chunk {
                    Ok(bytes) => {
                        let Ok(frame) = IpcFrame::new(msg_type::OUTPUT, bytes) else { continue };
                        if send_frame(&write_half, frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            changed = state_rx.recv() => {
                if changed.is_err() {
                    break;
                }
                if send_frame(&write_half, IpcFrame::empty(msg_type::STATE_CHANGE)).await.is_err() {
                    break;
                }
            }
            n = read_half.read(&mut read_chunk) => {
                match n {
                    Ok(0) => break,
                    Ok(n) => {
                        inbuf.extend_from_slice(&read_chunk[..n]);
                        loop {
                            match IpcFrame::try_parse(&inbuf) {
                                Ok(Some((frame, consumed))) => {
                                    inbuf.drain(..consumed);
                                    if !dispatch(&frame, &shared, &write_half).await {
                                        return;
                                    }
                                }
                                Ok(None) => break,
                                Err(_) => {
                                    inbuf.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Applies one inbound IPC frame. Returns `false` when the connection
/// should close (a `Close` request was handled).
async fn dispatch(frame: &IpcFrame, shared: &Arc<Shared>, write_half: &Arc<AsyncMutex<tokio::net::unix::OwnedWriteHalf>>) -> bool {
    match frame.msg_type {
        msg_type::INFO_REQUEST => {
            let info = shared.snapshot_info();
            let payload = serde_json::to_vec(&info).unwrap_or_default();
            if let Ok(frame) = IpcFrame::new(msg_type::INFO, payload) {
                let _ = send_frame(write_half, frame).await;
            }
        }
        msg_type::INPUT => {
            let _ = shared.cmd_tx.send(PtyCommand::Write(frame.payload.clone())).await;
        }
        msg_type::RESIZE => {
            if frame.payload.len() == 4 {
                let cols = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                let rows = u16::from_be_bytes([frame.payload[2], frame.payload[3]]);
                let _ = shared.cmd_tx.send(PtyCommand::Resize(cols, rows)).await;
            }
            let _ = send_frame(write_half, IpcFrame::empty(msg_type::RESIZE_ACK)).await;
        }
        msg_type::GET_BUFFER => {
            let snapshot = shared.buffer.lock().unwrap().snapshot();
            if let Ok(frame) = IpcFrame::new(msg_type::BUFFER, snapshot) {
                let _ = send_frame(write_half, frame).await;
            }
        }
        msg_type::SET_NAME => {
            let name = String::from_utf8(frame.payload.clone()).ok().filter(|s| !s.is_empty());
            shared.state.lock().unwrap().name = name;
            let _ = send_frame(write_half, IpcFrame::empty(msg_type::SET_NAME_ACK)).await;
            shared.notify_state_change();
        }
        msg_type::CLOSE => {
            let _ = shared.cmd_tx.send(PtyCommand::Terminate).await;
            let _ = send_frame(write_half, IpcFrame::empty(msg_type::CLOSE_ACK)).await;
            return false;
        }
        msg_type::PING => {
            let _ = send_frame(write_half, IpcFrame::empty(msg_type::PONG)).await;
        }
        other => {
            tracing::debug!(msg_type = other, "ignoring unrecognized ipc message");
        }
    }
    true
}

async fn send_frame(write_half: &Arc<AsyncMutex<tokio::net::unix::OwnedWriteHalf>>, frame: IpcFrame) -> io::Result<()> {
    let mut w = write_half.lock().await;
    w.write_all(&frame.encode()).await
}
