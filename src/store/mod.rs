//! Durable collaborators of the round engine.
//!
//! `BalanceStore` owns user balances; every mutation is an atomic
//! check-then-write under a per-user lock so a balance can never go negative,
//! even if a caller bypasses the engine's serialization point.
//! `RoundStore` owns round and bet history and is the source of truth for it.

pub mod memory;
pub mod rocks;

use crate::errors::StoreResult;
use crate::types::{BetRecord, RoundId, RoundRecord};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use memory::{MemoryBalanceStore, MemoryRoundStore};
pub use rocks::RocksStore;

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Remove `amount` from the user's balance, returning the new balance.
    /// Fails with `InsufficientFunds` without mutating anything.
    async fn debit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal>;

    /// Add `amount` to the user's balance, returning the new balance
    async fn credit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal>;

    /// Current balance; unknown users hold zero
    async fn balance(&self, user_id: &str) -> StoreResult<Decimal>;
}

#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Record a new unrevealed round. Keyed by commitment hash: repeating the
    /// call for a hash already stored returns the existing id.
    async fn create_round(&self, crash_point: Decimal, secret: &str, hash: &str) -> StoreResult<RoundId>;

    /// Mark the round resolved and its secret public
    async fn finalize_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()>;

    /// Reveal the secret of a round that never crashed. Voided rounds stay
    /// out of the recent history.
    async fn void_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()>;

    /// Insert or replace the bet row for `(round_id, user_id)`
    async fn record_bet(&self, bet: &BetRecord) -> StoreResult<()>;

    /// Flip every `placed` bet of the round to `lost`; returns how many changed
    async fn bulk_mark_lost(&self, round_id: RoundId) -> StoreResult<u64>;

    /// Crash points of the most recent finalized rounds, oldest first
    async fn load_recent_history(&self, limit: usize) -> StoreResult<Vec<Decimal>>;

    async fn load_round(&self, round_id: RoundId) -> StoreResult<Option<RoundRecord>>;

    async fn load_bets(&self, round_id: RoundId) -> StoreResult<Vec<BetRecord>>;
}
