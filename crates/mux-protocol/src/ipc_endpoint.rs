//! Resolves the Unix domain socket path a PTY host listens on and a Host
//! IPC Client connects to (§6.3, open question resolved): both sides must
//! compute the exact same path from nothing but the session id, which is
//! why this lives here rather than in either binary.

use std::path::PathBuf;

pub fn unix_socket_path(session_id: &str) -> PathBuf {
    let dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) if !runtime_dir.is_empty() => PathBuf::from(runtime_dir).join("mtmux"),
        _ => PathBuf::from(format!("/tmp/mtmux-{}", unix_uid())),
    };
    dir.join(format!("{session_id}.sock"))
}

#[cfg(unix)]
fn unix_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn unix_uid() -> u32 {
    0
}
