//! Error types for the crash engine
//!
//! Bet-path errors are rejected synchronously with no mutation; storage errors
//! carry enough context to decide between retry and fallback.

use crate::types::Phase;
use rust_decimal::Decimal;
use thiserror::Error;

/// Root error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Bet rejected: {0}")]
    Bet(#[from] BetError),

    #[error("Fairness error: {0}")]
    Fairness(#[from] FairnessError),

    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors raised by the balance and round stores
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database failure: {0}")]
    Database(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    #[error("{op} timed out after {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },

    #[error("Balance of {0} would overflow")]
    Overflow(String),
}

impl StoreError {
    /// Whether retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Timeout { .. })
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupted(e.to_string())
    }
}

/// Reasons a bet placement or cash-out is refused
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BetError {
    #[error("Bet amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Bet amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Bet amount {amount} exceeds the maximum of {maximum}")]
    AboveMaximum { amount: Decimal, maximum: Decimal },

    #[error("Auto cash-out target {0} must be at least 1.01")]
    InvalidAutoCashOut(Decimal),

    #[error("Cannot {action} while the round is {phase}")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("User {0} already has an active bet this round")]
    DuplicateBet(String),

    #[error("User {0} has no active bet this round")]
    NoActiveBet(String),

    #[error("Cash-out arrived after the round crashed")]
    TooLate,

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Amount out of range: {0}")]
    Overflow(String),

    #[error("Balance store unavailable: {0}")]
    Store(StoreError),

    #[error("Round engine unavailable")]
    EngineUnavailable,
}

impl BetError {
    /// Validation failures: malformed input or an action out of phase
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BetError::InvalidAmount(_)
                | BetError::BelowMinimum { .. }
                | BetError::AboveMaximum { .. }
                | BetError::InvalidAutoCashOut(_)
                | BetError::WrongPhase { .. }
                | BetError::DuplicateBet(_)
                | BetError::NoActiveBet(_)
                | BetError::Overflow(_)
        )
    }
}

impl From<StoreError> for BetError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds { needed, available } => {
                BetError::InsufficientFunds { needed, available }
            }
            StoreError::Overflow(user) => BetError::Overflow(format!("balance of {}", user)),
            other => BetError::Store(other),
        }
    }
}

/// Commit-reveal verification errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FairnessError {
    #[error("Secret is not valid hex: {0}")]
    InvalidHex(String),

    #[error("Secret must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_insufficient_funds_maps_to_bet_error() {
        let store_error = StoreError::InsufficientFunds {
            needed: Decimal::new(10, 0),
            available: Decimal::new(3, 0),
        };
        let bet_error: BetError = store_error.into();

        assert!(matches!(bet_error, BetError::InsufficientFunds { .. }));
        assert!(!bet_error.is_validation());
    }

    #[test]
    fn test_database_error_is_retryable() {
        assert!(StoreError::Database("io".to_string()).is_retryable());
        assert!(!StoreError::NotFound("round 1".to_string()).is_retryable());

        let bet_error: BetError = StoreError::Database("io".to_string()).into();
        assert!(matches!(bet_error, BetError::Store(_)));
    }

    #[test]
    fn test_error_display() {
        let error = BetError::WrongPhase {
            action: "cash out",
            phase: Phase::Waiting,
        };
        assert_eq!(error.to_string(), "Cannot cash out while the round is WAITING");
        assert!(error.is_validation());
    }

    #[test]
    fn test_error_source() {
        let engine_error: EngineError = StoreError::Database("disk".to_string()).into();
        assert!(engine_error.to_string().contains("Storage error"));
        assert!(engine_error.source().is_some());
    }
}
