//! Route Definitions

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Request interface
        .route("/bet", post(place_bet_handler))
        .route("/cashout", post(cash_out_handler))
        // Reads
        .route("/round", get(round_handler))
        .route("/history", get(history_handler))
        .route("/balance/:user", get(balance_handler))
        .route("/verify", get(verify_handler))
        // Observer stream
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
