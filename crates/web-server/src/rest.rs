//! REST control surface (§6.6): a small JSON API alongside the two
//! WebSocket endpoints, for callers that just want to create/list/resize
//! sessions without opening a mux connection — e.g. a CLI or a dashboard.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mux_protocol::SessionInfo;
use serde::{Deserialize, Serialize};

use crate::session_manager::SessionManager;

pub fn router(session_manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(close_session))
        .route("/api/sessions/{id}/resize", post(resize_session))
        .route("/healthz", get(healthz))
        .with_state(session_manager)
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    cols: u16,
    rows: u16,
    shell: Option<String>,
    cwd: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

async fn create_session(
    State(session_manager): State<Arc<SessionManager>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), (StatusCode, Json<ErrorBody>)> {
    session_manager
        .create_session(req.cols, req.rows, req.shell, req.cwd)
        .await
        .map(|info| (StatusCode::CREATED, Json(info)))
        .map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody { code: "unavailable", message: e.to_string() }),
            )
        })
}

async fn list_sessions(State(session_manager): State<Arc<SessionManager>>) -> Json<Vec<SessionInfo>> {
    Json(session_manager.snapshot_all().await)
}

async fn get_session(State(session_manager): State<Arc<SessionManager>>, Path(id): Path<String>) -> Result<Json<SessionInfo>, StatusCode> {
    session_manager.get_session(&id).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct ResizeRequest {
    cols: u16,
    rows: u16,
}

async fn resize_session(
    State(session_manager): State<Arc<SessionManager>>,
    Path(id): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> StatusCode {
    // No viewerId on this path: accepted unconditionally per §4.E.
    match session_manager.resize(&id, req.cols, req.rows, None).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn close_session(State(session_manager): State<Arc<SessionManager>>, Path(id): Path<String>) -> StatusCode {
    session_manager.close_session(&id).await;
    StatusCode::NO_CONTENT
}

async fn healthz() -> &'static str {
    "ok"
}
