//! `/ws/mux` (§4.G.1, §6.1): one binary WebSocket connection per viewer.
//! Sends the `Init` frame immediately, then two tasks run for the
//! connection's lifetime — one reading frames in and dispatching them
//! against the `SessionManager`, the other draining the viewer's
//! `OutputQueue` and writing frames out — joined at disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use mux_protocol::MuxFrame;
use nanoid::nanoid;

use crate::mux::MuxBroadcaster;

pub fn router(broadcaster: Arc<MuxBroadcaster>, path: &str) -> Router {
    Router::new().route(path, get(upgrade)).with_state(broadcaster)
}

async fn upgrade(ws: WebSocketUpgrade, State(broadcaster): State<Arc<MuxBroadcaster>>) -> Response {
    ws.on_upgrade(move |socket| handle(socket, broadcaster))
}

async fn handle(socket: WebSocket, broadcaster: Arc<MuxBroadcaster>) {
    let viewer_id = nanoid!();
    let client = broadcaster.register(viewer_id.clone());
    let queue = client.queue();

    let (mut sink, mut stream) = socket.split();

    if sink.send(Message::Binary(MuxFrame::Init.encode().into())).await.is_err() {
        broadcaster.unregister(&viewer_id);
        return;
    }

    let session_manager = broadcaster.session_manager();

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = queue.pop().await;
            if sink.send(Message::Binary(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = {
        let client = Arc::clone(&client);
        let session_manager = Arc::clone(&session_manager);
        let viewer_id = viewer_id.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                let Message::Binary(bytes) = message else { continue };
                let Ok(frame) = MuxFrame::decode(&bytes) else { continue };
                match frame {
                    MuxFrame::Input { session_id, data } => {
                        let _ = session_manager.send_input(&session_id, data, Some(&viewer_id)).await;
                    }
                    MuxFrame::Resize { session_id, cols, rows } => {
                        let _ = session_manager.resize(&session_id, cols, rows, Some(&viewer_id)).await;
                    }
                    MuxFrame::BufferRequest { session_id } => {
                        client.request_buffer(session_id);
                    }
                    MuxFrame::ActiveSessionHint { session_id } => {
                        client.set_active_hint(session_id);
                    }
                    // Output/SessionState/Resync/CompressedOutput/Init are
                    // server→client only; a malformed or unexpected frame
                    // from the viewer is ignored rather than closing the
                    // connection (§4.G.1).
                    _ => {}
                }
            }
        })
    };

    // Whichever side ends first (socket closed, send error) takes the other
    // down with it rather than leaving it to run against a dead connection.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broadcaster.unregister(&viewer_id);
}
