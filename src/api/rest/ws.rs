use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Ride lifecycle event stream for notification/UI layers.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_events(socket, state))
}

async fn handle_events(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.ride_events_tx.subscribe());

    info!("event stream client connected");

    let send_task = tokio::spawn(async move {
        while let Some(result) = events.next().await {
            // A lagged receiver skips to the newest events.
            let Ok(event) = result else {
                continue;
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize ride event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("event stream client disconnected");
}

/// Per-ride position stream: subscribing here is what makes the
/// broadcaster republish that ride's driver at all.
pub async fn track_handler(
    ws: WebSocketUpgrade,
    Path(ride_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_track(socket, state, ride_id))
}

async fn handle_track(socket: WebSocket, state: Arc<AppState>, ride_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.channels.subscribe(ride_id);

    info!(ride_id = %ride_id, "position tracker connected");

    let send_task = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            let json = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize position update for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(ride_id = %ride_id, "position tracker disconnected");
}
