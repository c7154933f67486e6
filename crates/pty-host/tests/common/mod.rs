//! Test harness: spawns the `pty-host` binary against a throwaway
//! `XDG_RUNTIME_DIR`, waits for its socket to appear, and gives tests a
//! small client for sending/receiving IPC frames. Mirrors the pattern of
//! spawning the real binary and polling for readiness on a deadline rather
//! than sleeping a fixed amount.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use mux_protocol::{ipc_msg_type as msg_type, IpcFrame};

pub struct PtyHostHandle {
    pub child: Child,
    pub socket_path: PathBuf,
    _runtime_dir: tempfile::TempDir,
}

impl Drop for PtyHostHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_pty_host(session_id: &str) -> PtyHostHandle {
    let runtime_dir = tempfile::tempdir().expect("tempdir");
    let socket_path = runtime_dir.path().join("mtmux").join(format!("{session_id}.sock"));

    let child = Command::new(binary_path())
        .arg("--session-id")
        .arg(session_id)
        .arg("--shell")
        .arg("/bin/sh")
        .arg("--cols")
        .arg("80")
        .arg("--rows")
        .arg("24")
        .env("XDG_RUNTIME_DIR", runtime_dir.path())
        .env("RUST_LOG", "error")
        .spawn()
        .expect("spawn pty-host");

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if socket_path.exists() {
            return PtyHostHandle {
                child,
                socket_path,
                _runtime_dir: runtime_dir,
            };
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("pty-host socket never appeared at {socket_path:?}");
}

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().expect("current_exe");
    path.pop(); // deps/
    path.pop(); // the test binary's own directory
    path.push("pty-host");
    path
}

pub struct SocketClient {
    stream: UnixStream,
    read_buf: Vec<u8>,
}

impl SocketClient {
    pub fn connect(handle: &PtyHostHandle) -> Self {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match UnixStream::connect(&handle.socket_path) {
                Ok(stream) => {
                    return Self {
                        stream,
                        read_buf: Vec::new(),
                    }
                }
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(25)),
                Err(e) => panic!("failed to connect to pty-host socket: {e}"),
            }
        }
    }

    pub fn send(&mut self, msg_type: u8, payload: Vec<u8>) {
        let frame = IpcFrame::new(msg_type, payload).expect("payload within limit");
        self.stream.write_all(&frame.encode()).expect("write frame");
    }

    /// Reads frames until one with `want_type` arrives, or the deadline
    /// passes. Frames of other types (e.g. unsolicited `Output`) are
    /// discarded.
    pub fn recv_frame(&mut self, want_type: u8, timeout: Duration) -> IpcFrame {
        let deadline = Instant::now() + timeout;
        self.stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        loop {
            if let Some((frame, consumed)) = IpcFrame::try_parse(&self.read_buf).expect("well-formed frame") {
                self.read_buf.drain(..consumed);
                if frame.msg_type == want_type {
                    return frame;
                }
                continue;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for ipc message type {want_type}");
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => panic!("pty-host closed the connection"),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read error: {e}"),
            }
        }
    }
}
