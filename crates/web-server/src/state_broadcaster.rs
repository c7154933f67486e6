//! State Broadcaster (§4.I): the `/ws/state` endpoint. Plain JSON over a
//! WebSocket text frame, one message per connect and one per state change
//! — a much simpler sibling of the binary mux protocol, since nothing here
//! needs per-byte ordering or backpressure control.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use mux_protocol::{SessionInfo, SessionListMessage};

use crate::session_manager::SessionManager;

/// Collapses bursts of rapid state changes (several sessions created in a
/// row) into a single push instead of one message per session.
const DEBOUNCE: Duration = Duration::from_millis(25);

pub fn router(session_manager: Arc<SessionManager>, path: &str) -> Router {
    Router::new().route(path, get(upgrade)).with_state(session_manager)
}

async fn upgrade(ws: WebSocketUpgrade, State(session_manager): State<Arc<SessionManager>>) -> Response {
    ws.on_upgrade(move |socket| run(socket, session_manager))
}

async fn run(mut socket: WebSocket, session_manager: Arc<SessionManager>) {
    let (id, mut rx) = session_manager.add_state_listener();

    let initial = session_manager.snapshot_all().await;
    if send_snapshot(&mut socket, &initial).await.is_err() {
        session_manager.remove_state_listener(id);
        return;
    }

    loop {
        let Some(mut sessions) = rx.recv().await else { break };
        // Drain anything else queued within the debounce window so a burst
        // of updates collapses into the most recent snapshot.
        tokio::time::sleep(DEBOUNCE).await;
        while let Ok(next) = rx.try_recv() {
            sessions = next;
        }
        if send_snapshot(&mut socket, &sessions).await.is_err() {
            break;
        }
    }

    session_manager.remove_state_listener(id);
}

async fn send_snapshot(socket: &mut WebSocket, sessions: &[SessionInfo]) -> Result<(), axum::Error> {
    let message = SessionListMessage::new(sessions.to_vec());
    let text = serde_json::to_string(&message).unwrap_or_else(|_| "{\"sessions\":{\"sessions\":[]}}".to_string());
    socket.send(Message::Text(text.into())).await
}
