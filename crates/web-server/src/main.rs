//! web-server: the browser-facing relay (§4). Terminates two WebSocket
//! endpoints (`/ws/mux`, `/ws/state`) and a small REST surface, and spawns
//! one pty-host child process per session, talking to each over the host
//! IPC protocol on a Unix domain socket.

mod config;
mod error;
mod ipc_client;
mod mux;
mod rest;
mod session_manager;
mod state_broadcaster;
mod ws_mux;

use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;

use config::ServerConfig;
use mux::MuxBroadcaster;
use session_manager::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(ServerConfig::parse());

    let broadcaster = MuxBroadcaster::new(config.viewer_queue_capacity);
    let session_manager = SessionManager::new(Arc::clone(&config), Arc::clone(&broadcaster));
    broadcaster.bind_session_manager(Arc::clone(&session_manager));

    let (_listener_id, state_rx) = session_manager.add_state_listener();
    broadcaster.spawn_state_listener(state_rx);

    let app = Router::new()
        .merge(ws_mux::router(Arc::clone(&broadcaster), &config.mux_endpoint_path))
        .merge(state_broadcaster::router(Arc::clone(&session_manager), &config.state_endpoint_path))
        .merge(rest::router(Arc::clone(&session_manager)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "web-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
