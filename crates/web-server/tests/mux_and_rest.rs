//! End-to-end tests against the real `web-server` + `pty-host` binaries:
//! REST session lifecycle, the mux WebSocket's `Init` frame and input/output
//! round-trip, the active-viewer-wins resize rule, and the state
//! WebSocket's initial snapshot push.

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mux_protocol::{MuxFrame, SessionInfo, SessionListMessage};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn create_session(base_url: &str) -> SessionInfo {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base_url}/api/sessions"))
        .json(&json!({ "cols": 80, "rows": 24, "shell": "/bin/sh" }))
        .send()
        .await
        .expect("create session request");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    resp.json().await.expect("session info body")
}

#[tokio::test]
async fn rest_session_lifecycle() {
    let server = common::spawn_server().await;

    let info = create_session(&server.base_url).await;
    assert_eq!(info.cols, 80);
    assert_eq!(info.rows, 24);
    assert!(info.is_running);

    let client = reqwest::Client::new();

    let listed: Vec<SessionInfo> = client
        .get(format!("{}/api/sessions", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.iter().any(|s| s.id == info.id));

    let fetched: SessionInfo = client
        .get(format!("{}/api/sessions/{}", server.base_url, info.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.id, info.id);

    let resize_status = client
        .post(format!("{}/api/sessions/{}/resize", server.base_url, info.id))
        .json(&json!({ "cols": 120, "rows": 40 }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(resize_status, reqwest::StatusCode::OK);

    let close_status = client
        .delete(format!("{}/api/sessions/{}", server.base_url, info.id))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(close_status, reqwest::StatusCode::NO_CONTENT);

    // Idempotent: closing an already-closed (or never-existing) session
    // still reports success per §6.6.
    let second_close_status = client
        .delete(format!("{}/api/sessions/{}", server.base_url, info.id))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(second_close_status, reqwest::StatusCode::NO_CONTENT);

    let missing_status = client
        .get(format!("{}/api/sessions/{}", server.base_url, info.id))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(missing_status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mux_websocket_sends_init_then_echoes_input_as_output() {
    let server = common::spawn_server().await;
    let info = create_session(&server.base_url).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(&server.ws_mux_url).await.expect("connect mux ws");

    let first = ws.next().await.expect("init message").expect("ws ok");
    let WsMessage::Binary(bytes) = first else { panic!("expected binary Init frame") };
    assert_eq!(MuxFrame::decode(&bytes).unwrap(), MuxFrame::Init);

    let hint = MuxFrame::ActiveSessionHint { session_id: Some(info.id.clone()) };
    ws.send(WsMessage::Binary(hint.encode().into())).await.unwrap();

    let input = MuxFrame::Input { session_id: info.id.clone(), data: b"echo hi\n".to_vec() };
    ws.send(WsMessage::Binary(input.encode().into())).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut saw_echo = false;
    while tokio::time::Instant::now() < deadline {
        let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_millis(200), ws.next()).await else { continue };
        let WsMessage::Binary(bytes) = msg else { continue };
        let Ok(MuxFrame::Output { session_id, data, .. }) = MuxFrame::decode(&bytes) else { continue };
        if session_id == info.id && String::from_utf8_lossy(&data).contains("hi") {
            saw_echo = true;
            break;
        }
    }
    assert!(saw_echo, "never observed the shell echoing input back as Output");
}

#[tokio::test]
async fn resize_rejects_when_viewer_is_not_the_active_viewer() {
    let server = common::spawn_server().await;
    let info = create_session(&server.base_url).await;

    let (mut viewer_a, _) = tokio_tungstenite::connect_async(&server.ws_mux_url).await.unwrap();
    let _ = viewer_a.next().await; // Init

    // Claim active-viewer status by sending input as viewer A.
    let input = MuxFrame::Input { session_id: info.id.clone(), data: b"\n".to_vec() };
    viewer_a.send(WsMessage::Binary(input.encode().into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (mut viewer_b, _) = tokio_tungstenite::connect_async(&server.ws_mux_url).await.unwrap();
    let _ = viewer_b.next().await; // Init

    let resize = MuxFrame::Resize { session_id: info.id.clone(), cols: 200, rows: 60 };
    viewer_b.send(WsMessage::Binary(resize.encode().into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let after: SessionInfo = client
        .get(format!("{}/api/sessions/{}", server.base_url, info.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_ne!((after.cols, after.rows), (200, 60), "viewer B was not the active viewer and should have been rejected");
}

#[tokio::test]
async fn state_websocket_pushes_initial_snapshot_on_connect() {
    let server = common::spawn_server().await;
    let info = create_session(&server.base_url).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(&server.ws_state_url).await.expect("connect state ws");
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("initial snapshot within deadline")
        .expect("ws item")
        .expect("ws ok");
    let WsMessage::Text(text) = msg else { panic!("expected text frame") };
    let parsed: SessionListMessage = serde_json::from_str(&text).expect("valid envelope");
    assert!(parsed.sessions.sessions.iter().any(|s| s.id == info.id));
}
