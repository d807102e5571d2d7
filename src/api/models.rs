//! API Request and Response Models

use crate::types::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub phase: String,
    pub observers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: UserId,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

/// Recent crash points, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub crash_points: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyQuery {
    pub secret: String,
    #[serde(default)]
    pub hash: Option<String>,
}
