//! Test harness: spawns the real `web-server` binary against an ephemeral
//! port and a throwaway `XDG_RUNTIME_DIR`, pointed at the sibling
//! `pty-host` binary cargo already built for this workspace. Mirrors the
//! pty-host test harness's spawn-and-poll-for-readiness pattern rather than
//! driving the app in-process, so the test exercises the same process
//! boundaries a real deployment has.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

pub struct ServerHandle {
    pub child: Child,
    pub base_url: String,
    pub ws_mux_url: String,
    pub ws_state_url: String,
    _runtime_dir: tempfile::TempDir,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub async fn spawn_server() -> ServerHandle {
    let port = free_port();
    let runtime_dir = tempfile::tempdir().expect("tempdir");
    let bind_addr = format!("127.0.0.1:{port}");

    let child = Command::new(binary_path("web-server"))
        .env("MTMUX_BIND_ADDR", &bind_addr)
        .env("MTMUX_PTY_HOST_PATH", binary_path("pty-host"))
        .env("XDG_RUNTIME_DIR", runtime_dir.path())
        .env("RUST_LOG", "error")
        .spawn()
        .expect("spawn web-server");

    let handle = ServerHandle {
        child,
        base_url: format!("http://{bind_addr}"),
        ws_mux_url: format!("ws://{bind_addr}/ws/mux"),
        ws_state_url: format!("ws://{bind_addr}/ws/state"),
        _runtime_dir: runtime_dir,
    };

    wait_for_healthz(&handle.base_url).await;
    handle
}

async fn wait_for_healthz(base_url: &str) {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/healthz")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() >= deadline {
            panic!("web-server never became healthy at {base_url}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port").local_addr().unwrap().port()
}

fn binary_path(name: &str) -> PathBuf {
    let mut path = std::env::current_exe().expect("current_exe");
    path.pop(); // deps/
    path.pop(); // target/debug
    path.push(name);
    path
}
