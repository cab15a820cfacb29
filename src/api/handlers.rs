//! Request Handlers
//!
//! Thin adapters from HTTP to the crash engine. Every rejection carries the
//! request ID and the engine's machine code.

use super::{
    errors::ApiError,
    middleware::{PlayerIdentity, RequestId},
    models::*,
};
use crate::broadcast::RoundSnapshot;
use crate::engine::CrashEngine;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Maximum rounds returned by one history request
const MAX_HISTORY_LIMIT: usize = 100;

/// Shared application state
pub struct AppState {
    pub engine: Arc<CrashEngine>,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.engine.snapshot();
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        round_id: snapshot.round_id,
        state: snapshot.state,
        uptime_secs: state.engine.metrics().uptime().as_secs(),
    })
}

/// POST /api/crash/bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    PlayerIdentity(player): PlayerIdentity,
    body: Result<Json<PlaceBetRequest>, JsonRejection>,
) -> Result<Json<PlaceBetResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;

    let receipt = state
        .engine
        .place_bet(&player, request.stake, &request.game_name, request.auto_cashout)
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok(Json(receipt.into()))
}

/// POST /api/crash/cashout
pub async fn cashout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    PlayerIdentity(player): PlayerIdentity,
) -> Result<Json<CashoutResponse>, ApiError> {
    let receipt = state
        .engine
        .cash_out(&player)
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok(Json(receipt.into()))
}

/// GET /api/crash/round
pub async fn round_handler(State(state): State<Arc<AppState>>) -> Json<RoundSnapshot> {
    Json(state.engine.snapshot())
}

/// GET /api/crash/history?limit={n}
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = params.limit.min(MAX_HISTORY_LIMIT);
    Json(HistoryResponse {
        rounds: state.engine.history(limit),
    })
}

/// GET /api/wallet/balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    PlayerIdentity(player): PlayerIdentity,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .engine
        .balance(&player)
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok(Json(BalanceResponse { player, balance }))
}

/// GET /api/wallet/transactions
pub async fn transactions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    PlayerIdentity(player): PlayerIdentity,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state
        .engine
        .transactions(&player)
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok(Json(TransactionsResponse { player, transactions }))
}

/// GET /metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.engine.metrics().to_prometheus_format(),
    )
}
