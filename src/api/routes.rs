//! Route Definitions

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Crash table
        .route("/api/crash/bet", post(place_bet_handler))
        .route("/api/crash/cashout", post(cashout_handler))
        .route("/api/crash/round", get(round_handler))
        .route("/api/crash/history", get(history_handler))
        // Wallet
        .route("/api/wallet/balance", get(balance_handler))
        .route("/api/wallet/transactions", get(transactions_handler))
        // Live round feed
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
