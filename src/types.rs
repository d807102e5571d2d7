use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player identifier (wallet address or account id)
pub type UserId = String;

/// Round lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Startup, before the first round
    Connecting,
    /// Bets accepted
    Waiting,
    /// Multiplier rising
    Running,
    /// Settlement and cooldown
    Crashed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connecting => write!(f, "CONNECTING"),
            Phase::Waiting => write!(f, "WAITING"),
            Phase::Running => write!(f, "RUNNING"),
            Phase::Crashed => write!(f, "CRASHED"),
        }
    }
}

/// Durable round identifier assigned by the round store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Placed,
    CashedOut,
    Lost,
}

impl BetStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, BetStatus::Placed)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Placed => write!(f, "placed"),
            BetStatus::CashedOut => write!(f, "cashed_out"),
            BetStatus::Lost => write!(f, "lost"),
        }
    }
}

/// A bet in the current round, held by the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: BetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_multiplier: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn to_record(&self, round_id: RoundId) -> BetRecord {
        BetRecord {
            round_id,
            user_id: self.user_id.clone(),
            amount: self.amount,
            status: self.status,
            multiplier: self.cash_out_multiplier,
            payout: self.payout,
        }
    }
}

/// Persisted round, as held by the round store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub round_id: RoundId,
    pub crash_point: Decimal,
    /// Hex-encoded server secret; only exposed once `revealed` is set
    pub secret: String,
    pub hash: String,
    pub revealed: bool,
    /// Interrupted before it crashed; stakes were refunded and it is not history
    #[serde(default)]
    pub voided: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Persisted bet row, keyed by (round, user)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetRecord {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: BetStatus,
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
}

/// Bet request from the request interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub auto_cash_out: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetReceipt {
    pub user_id: UserId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub hashed_server_seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashOutReceipt {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    #[serde(with = "rust_decimal::serde::float")]
    pub multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub payout: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    /// False when the credit was applied but the audit record could not be written
    pub audit_persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Phase::Running).unwrap(), "\"RUNNING\"");
        let phase: Phase = serde_json::from_str("\"CRASHED\"").unwrap();
        assert_eq!(phase, Phase::Crashed);
    }

    #[test]
    fn test_bet_request_accepts_numbers_and_strings() {
        let request: BetRequest =
            serde_json::from_str(r#"{"userId":"0xabc","amount":10,"autoCashOut":"2.5"}"#).unwrap();
        assert_eq!(request.amount, Decimal::new(10, 0));
        assert_eq!(request.auto_cash_out, Some(Decimal::new(25, 1)));
    }

    #[test]
    fn test_bet_status_finality() {
        assert!(!BetStatus::Placed.is_final());
        assert!(BetStatus::CashedOut.is_final());
        assert_eq!(BetStatus::CashedOut.to_string(), "cashed_out");
    }
}
