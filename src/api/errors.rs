//! API Error Handling
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::GameError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine code (INVALID_STAKE, STATE_CONFLICT, UNAUTHENTICATED, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    /// Rejected game or wallet operation
    Game(GameError),
    Unauthenticated(String),
    BadRequest(String),
}

impl ApiError {
    pub fn game(request_id: String, error: GameError) -> Self {
        Self {
            kind: ApiErrorKind::Game(error),
            request_id,
        }
    }

    pub fn unauthenticated(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthenticated(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ApiErrorKind::Game(e) => game_status(e),
            ApiErrorKind::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// HTTP status for each game rejection
pub fn game_status(error: &GameError) -> StatusCode {
    match error {
        GameError::InvalidStake { .. }
        | GameError::InvalidAutoCashout { .. }
        | GameError::InsufficientBalance { .. }
        | GameError::UnknownGame(_) => StatusCode::BAD_REQUEST,
        GameError::DuplicateBet { .. } | GameError::StateConflict { .. } | GameError::AlreadySettled { .. } => {
            StatusCode::CONFLICT
        }
        GameError::BetNotFound { .. } | GameError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        GameError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn game_details(error: &GameError) -> Option<serde_json::Value> {
    match error {
        GameError::InvalidStake { stake, min, max } => Some(json!({ "stake": stake, "min": min, "max": max })),
        GameError::InvalidAutoCashout { value, max } => Some(json!({ "auto_cashout": value, "max": max })),
        GameError::InsufficientBalance { available, required } => {
            Some(json!({ "available": available, "required": required }))
        }
        GameError::StateConflict { state, .. } => Some(json!({ "state": state })),
        GameError::DuplicateBet { round_id, .. } | GameError::BetNotFound { round_id, .. } => {
            Some(json!({ "round_id": round_id }))
        }
        GameError::AlreadySettled { bet_id } => Some(json!({ "bet_id": bet_id })),
        _ => None,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::Game(e) => write!(f, "[{}] {}: {}", self.request_id, e.code(), e),
            ApiErrorKind::Unauthenticated(msg) => write!(f, "[{}] Unauthenticated: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.kind {
            ApiErrorKind::Game(ref e) => ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                details: game_details(e),
            },
            ApiErrorKind::Unauthenticated(message) => ErrorBody {
                code: "UNAUTHENTICATED".to_string(),
                message,
                details: None,
            },
            ApiErrorKind::BadRequest(message) => ErrorBody {
                code: "BAD_REQUEST".to_string(),
                message,
                details: None,
            },
        };

        (
            status,
            Json(ErrorResponse {
                request_id: self.request_id,
                error: body,
            }),
        )
            .into_response()
    }
}
