//! Bet and store failures rendered as HTTP errors
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::{BetError, FairnessError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// BAD_REQUEST, INSUFFICIENT_FUNDS, CONFLICT, SERVICE_UNAVAILABLE, ...
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    InsufficientFunds(String),
    Conflict(String),
    NotFound(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn service_unavailable(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::ServiceUnavailable(message),
            request_id,
        }
    }

    /// Map an engine rejection onto its HTTP class
    pub fn from_bet(request_id: String, error: BetError) -> Self {
        let message = error.to_string();
        let kind = match error {
            BetError::TooLate | BetError::WrongPhase { .. } => ApiErrorKind::Conflict(message),
            BetError::InsufficientFunds { .. } => ApiErrorKind::InsufficientFunds(message),
            BetError::Store(_) | BetError::EngineUnavailable => ApiErrorKind::ServiceUnavailable(message),
            _ => ApiErrorKind::BadRequest(message),
        };
        Self { kind, request_id }
    }

    pub fn from_store(request_id: String, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(msg) => Self::not_found(request_id, msg),
            other => Self::service_unavailable(request_id, other.to_string()),
        }
    }

    pub fn from_fairness(request_id: String, error: FairnessError) -> Self {
        Self::bad_request(request_id, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
            ApiErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::InsufficientFunds(msg) => write!(f, "[{}] Insufficient Funds: {}", self.request_id, msg),
            ApiErrorKind::Conflict(msg) => write!(f, "[{}] Conflict: {}", self.request_id, msg),
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::ServiceUnavailable(msg) => write!(f, "[{}] Service Unavailable: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self.kind {
            ApiErrorKind::BadRequest(msg) => ("BAD_REQUEST", msg),
            ApiErrorKind::InsufficientFunds(msg) => ("INSUFFICIENT_FUNDS", msg),
            ApiErrorKind::Conflict(msg) => ("CONFLICT", msg),
            ApiErrorKind::NotFound(msg) => ("NOT_FOUND", msg),
            ApiErrorKind::ServiceUnavailable(msg) => ("SERVICE_UNAVAILABLE", msg),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
