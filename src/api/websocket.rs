//! WebSocket observer stream
//!
//! Each observer gets the latest snapshot on connect, then every published
//! snapshot as a JSON text frame. Observers are independent: a send failure or
//! a lagging receiver only affects that connection.

use super::handlers::AppState;
use crate::broadcast::{Broadcaster, RoundSnapshot};
use crate::metrics::EngineMetrics;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let broadcaster = state.broadcaster.clone();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, broadcaster, metrics))
}

fn encode(snapshot: &RoundSnapshot) -> Option<Message> {
    match serde_json::to_string(snapshot) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!("Failed to serialize snapshot: {}", e);
            None
        }
    }
}

async fn handle_connection(socket: WebSocket, broadcaster: Broadcaster, metrics: Arc<EngineMetrics>) {
    let client_id = generate_client_id();
    // Subscribe before reading `latest` so nothing published in between is missed
    let mut rx = broadcaster.subscribe();
    let connected = metrics.observer_connected();
    info!("WebSocket observer {} connected (total: {})", client_id, connected);

    let (mut sender, mut receiver) = socket.split();

    if let Some(message) = encode(&broadcaster.latest()) {
        if sender.send(message).await.is_err() {
            let remaining = metrics.observer_disconnected();
            debug!("Observer {} left before the first snapshot (remaining: {})", client_id, remaining);
            return;
        }
    }

    let recv_id = client_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("Observer {} requested close", recv_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error from observer {}: {}", recv_id, e);
                    break;
                }
            }
        }
    });

    let send_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = broadcaster.closed() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                received = rx.recv() => match received {
                    Ok(snapshot) => {
                        let Some(message) = encode(&snapshot) else { continue };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Observer {} skipped {} stale snapshots", send_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }

    let remaining = metrics.observer_disconnected();
    info!("WebSocket observer {} disconnected (remaining: {})", client_id, remaining);
}

fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("ws_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
