use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::session::WatchLease;
use crate::error::AppError;
use crate::state::AppState;
use crate::view::TrackingView;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (views, lease) = state
        .sessions
        .get(&id)
        .map(|session| (session.value().subscribe(), session.value().watch()))
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", id)))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, id, views, lease)))
}

async fn handle_socket(
    socket: WebSocket,
    id: Uuid,
    views: watch::Receiver<TrackingView>,
    _lease: WatchLease,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut views = WatchStream::new(views);

    info!(session_id = %id, "websocket client connected");

    // Ends when the session is unmounted and its view sender is dropped.
    let mut send_task = tokio::spawn(async move {
        while let Some(view) = views.next().await {
            let json = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking view for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(session_id = %id, "websocket client disconnected");
}
