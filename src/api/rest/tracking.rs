use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::session::SessionCommands;
use crate::error::AppError;
use crate::map::MapControl;
use crate::state::AppState;
use crate::view::{TrackingRequest, TrackingView};

use super::ws;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking", post(mount_session))
        .route("/tracking/:id", get(get_view).delete(unmount_session))
        .route("/tracking/:id/retry", post(retry_session))
        .route("/tracking/:id/map/:action", post(map_control))
        .route("/tracking/:id/ws", get(ws::ws_handler))
}

#[derive(Serialize)]
pub struct MountResponse {
    pub session_id: Uuid,
    pub view: TrackingView,
}

async fn mount_session(
    State(state): State<Arc<AppState>>,
    Json(mut payload): Json<TrackingRequest>,
) -> Result<Json<MountResponse>, AppError> {
    payload.role = payload.role.trim().to_string();
    if payload.role.is_empty() {
        return Err(AppError::BadRequest("role cannot be empty".to_string()));
    }

    let view = state.mount(payload);

    Ok(Json(MountResponse {
        session_id: view.session_id,
        view,
    }))
}

async fn get_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingView>, AppError> {
    let view = state
        .view(id)
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))?;

    Ok(Json(view))
}

fn commands(state: &AppState, id: Uuid) -> Result<SessionCommands, AppError> {
    state
        .commands(id)
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))
}

async fn retry_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    commands(&state, id)?.retry().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn map_control(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    let control = MapControl::parse(&action)
        .ok_or_else(|| AppError::BadRequest(format!("unknown map action {action}")))?;

    commands(&state, id)?.control(control).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn unmount_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.unmount(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("session {} not found", id)))
    }
}
