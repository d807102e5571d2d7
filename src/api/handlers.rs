//! Request Handlers
//!
//! Bet and cash-out requests go through the engine mailbox; reads are served
//! from the latest snapshot or straight from the stores.

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::{
    broadcast::{Broadcaster, RoundSnapshot},
    engine::EngineHandle,
    fairness::{self, Verification},
    metrics::EngineMetrics,
    store::BalanceStore,
    types::{BetReceipt, BetRequest, CashOutReceipt},
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub engine: EngineHandle,
    pub broadcaster: Broadcaster,
    pub balances: Arc<dyn BalanceStore>,
    pub metrics: Arc<EngineMetrics>,
    pub instant_bust_modulus: u64,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.engine.is_closed() { "Stopped" } else { "Running" };
    Json(HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        phase: state.broadcaster.latest().phase.to_string(),
        observers: state.broadcaster.observer_count(),
    })
}

/// POST /bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<BetRequest>,
) -> Result<Json<BetReceipt>, ApiError> {
    state
        .engine
        .place_bet(request)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_bet(request_id.0, e))
}

/// POST /cashout
pub async fn cash_out_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CashOutRequest>,
) -> Result<Json<CashOutReceipt>, ApiError> {
    state
        .engine
        .cash_out(request.user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_bet(request_id.0, e))
}

/// GET /round
pub async fn round_handler(State(state): State<Arc<AppState>>) -> Json<RoundSnapshot> {
    Json(state.broadcaster.latest().as_ref().clone())
}

/// GET /history
pub async fn history_handler(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        crash_points: state.broadcaster.latest().history.clone(),
    })
}

/// GET /balance/:user
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .balances
        .balance(&user_id)
        .await
        .map_err(|e| ApiError::from_store(request_id.0, e))?;

    Ok(Json(BalanceResponse { user_id, balance }))
}

/// GET /verify?secret={hex}&hash={hex}
pub async fn verify_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<Verification>, ApiError> {
    fairness::verify(&query.secret, query.hash.as_deref(), state.instant_bust_modulus)
        .map(Json)
        .map_err(|e| ApiError::from_fairness(request_id.0, e))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.to_prometheus_format(),
    )
}
