//! Typed server configuration (§10.2): clap for the CLI surface, with every
//! flag also readable from an environment variable so the process can be
//! configured the same way in a container as on a developer's shell. No
//! file-based config layer — the flag/env set is small enough that one
//! wouldn't earn its keep.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "web-server", about = "Browser-facing terminal multiplexer relay")]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[arg(long, env = "MTMUX_BIND_ADDR", default_value = "127.0.0.1:7681")]
    pub bind_addr: SocketAddr,

    /// Shell used for sessions that don't specify one explicitly.
    #[arg(long, env = "MTMUX_DEFAULT_SHELL", default_value = "/bin/bash")]
    pub default_shell: String,

    /// Path to the pty-host binary; defaults to a sibling of this binary.
    #[arg(long, env = "MTMUX_PTY_HOST_PATH")]
    pub pty_host_path: Option<PathBuf>,

    /// Scrollback capacity requested from each pty-host, in bytes.
    #[arg(long, env = "MTMUX_SCROLLBACK_BYTES", default_value_t = 128 * 1024)]
    pub scrollback_bytes: usize,

    /// Per-viewer bounded output queue capacity (§4.G, Q).
    #[arg(long, env = "MTMUX_VIEWER_QUEUE_CAPACITY", default_value_t = 500)]
    pub viewer_queue_capacity: usize,

    /// Path the binary mux WebSocket endpoint is served at.
    #[arg(long, env = "MTMUX_MUX_ENDPOINT_PATH", default_value = "/ws/mux")]
    pub mux_endpoint_path: String,

    /// Path the JSON session-state WebSocket endpoint is served at.
    #[arg(long, env = "MTMUX_STATE_ENDPOINT_PATH", default_value = "/ws/state")]
    pub state_endpoint_path: String,
}

impl ServerConfig {
    pub fn pty_host_binary(&self) -> PathBuf {
        if let Some(path) = &self.pty_host_path {
            return path.clone();
        }
        let mut path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("web-server"));
        path.pop();
        path.push("pty-host");
        path
    }
}
