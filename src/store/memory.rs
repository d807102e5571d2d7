//! In-process stores for tests and ephemeral runs.
//!
//! Balances live in a `DashMap`; holding the entry guard for the whole
//! check-then-write gives the same per-user exclusion as a row lock.

use super::{BalanceStore, RoundStore};
use crate::errors::{StoreError, StoreResult};
use crate::fairness::hash_secret;
use crate::types::{BetRecord, BetStatus, RoundId, RoundRecord};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct MemoryBalanceStore {
    balances: DashMap<String, Decimal>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<'a>(entries: impl IntoIterator<Item = (&'a str, Decimal)>) -> Self {
        let store = Self::new();
        for (user, amount) in entries {
            store.deposit(user, amount);
        }
        store
    }

    /// Operator funding path; not part of the engine's contract
    pub fn deposit(&self, user_id: &str, amount: Decimal) {
        let mut entry = self.balances.entry(user_id.to_string()).or_insert(Decimal::ZERO);
        *entry = entry.saturating_add(amount);
    }

    pub fn get(&self, user_id: &str) -> Decimal {
        self.balances.get(user_id).map(|b| *b).unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn debit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal> {
        let mut entry = self.balances.entry(user_id.to_string()).or_insert(Decimal::ZERO);
        if *entry < amount {
            return Err(StoreError::InsufficientFunds {
                needed: amount,
                available: *entry,
            });
        }
        *entry = entry
            .checked_sub(amount)
            .ok_or_else(|| StoreError::Overflow(user_id.to_string()))?;
        Ok(*entry)
    }

    async fn credit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal> {
        let mut entry = self.balances.entry(user_id.to_string()).or_insert(Decimal::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow(user_id.to_string()))?;
        Ok(*entry)
    }

    async fn balance(&self, user_id: &str) -> StoreResult<Decimal> {
        Ok(self.get(user_id))
    }
}

/// Round history in memory, with hooks to simulate store outages
#[derive(Default)]
pub struct MemoryRoundStore {
    next_id: AtomicU64,
    rounds: DashMap<RoundId, RoundRecord>,
    by_hash: DashMap<String, RoundId>,
    bets: DashMap<(RoundId, String), BetRecord>,
    failing_creates: AtomicU32,
    failing_bet_writes: AtomicU32,
}

impl MemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload finalized rounds with the given crash points, oldest first
    pub fn with_history(crash_points: impl IntoIterator<Item = Decimal>) -> Self {
        let store = Self::new();
        for crash_point in crash_points {
            let id = RoundId(store.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            store.rounds.insert(
                id,
                RoundRecord {
                    round_id: id,
                    crash_point,
                    secret: String::new(),
                    hash: String::new(),
                    revealed: true,
                    voided: false,
                    created_at: Utc::now(),
                    finalized_at: Some(Utc::now()),
                },
            );
        }
        store
    }

    /// The next `n` calls to `create_round` fail
    pub fn fail_next_creates(&self, n: u32) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls to `record_bet` fail
    pub fn fail_next_bet_writes(&self, n: u32) {
        self.failing_bet_writes.store(n, Ordering::SeqCst);
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn bet(&self, round_id: RoundId, user_id: &str) -> Option<BetRecord> {
        self.bets.get(&(round_id, user_id.to_string())).map(|b| b.clone())
    }

    fn reveal(&self, round_id: RoundId, revealed_secret: &str, voided: bool) -> StoreResult<()> {
        let mut round = self
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| StoreError::NotFound(format!("round {}", round_id)))?;

        let secret = hex::decode(revealed_secret).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        if hash_secret(&secret) != round.hash {
            return Err(StoreError::Corrupted(format!(
                "revealed secret does not match commitment of round {}",
                round_id
            )));
        }

        round.revealed = true;
        round.voided = voided;
        round.finalized_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    async fn create_round(&self, crash_point: Decimal, secret: &str, hash: &str) -> StoreResult<RoundId> {
        if Self::take_failure(&self.failing_creates) {
            return Err(StoreError::Database("simulated create_round failure".to_string()));
        }

        let slot = match self.by_hash.entry(hash.to_string()) {
            Entry::Occupied(existing) => return Ok(*existing.get()),
            Entry::Vacant(slot) => slot,
        };

        let id = RoundId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.rounds.insert(
            id,
            RoundRecord {
                round_id: id,
                crash_point,
                secret: secret.to_string(),
                hash: hash.to_string(),
                revealed: false,
                voided: false,
                created_at: Utc::now(),
                finalized_at: None,
            },
        );
        slot.insert(id);
        Ok(id)
    }

    async fn finalize_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()> {
        self.reveal(round_id, revealed_secret, false)
    }

    async fn void_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()> {
        self.reveal(round_id, revealed_secret, true)
    }

    async fn record_bet(&self, bet: &BetRecord) -> StoreResult<()> {
        if Self::take_failure(&self.failing_bet_writes) {
            return Err(StoreError::Database("simulated record_bet failure".to_string()));
        }
        self.bets.insert((bet.round_id, bet.user_id.clone()), bet.clone());
        Ok(())
    }

    async fn bulk_mark_lost(&self, round_id: RoundId) -> StoreResult<u64> {
        let mut changed = 0;
        for mut entry in self.bets.iter_mut() {
            if entry.key().0 == round_id && entry.status == BetStatus::Placed {
                entry.status = BetStatus::Lost;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn load_recent_history(&self, limit: usize) -> StoreResult<Vec<Decimal>> {
        let mut finalized: Vec<(RoundId, Decimal)> = self
            .rounds
            .iter()
            .filter(|r| r.revealed && !r.voided)
            .map(|r| (r.round_id, r.crash_point))
            .collect();
        finalized.sort_by_key(|(id, _)| *id);

        let skip = finalized.len().saturating_sub(limit);
        Ok(finalized.into_iter().skip(skip).map(|(_, cp)| cp).collect())
    }

    async fn load_round(&self, round_id: RoundId) -> StoreResult<Option<RoundRecord>> {
        Ok(self.rounds.get(&round_id).map(|r| r.clone()))
    }

    async fn load_bets(&self, round_id: RoundId) -> StoreResult<Vec<BetRecord>> {
        let mut bets: Vec<BetRecord> = self
            .bets
            .iter()
            .filter(|b| b.key().0 == round_id)
            .map(|b| b.value().clone())
            .collect();
        bets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(bets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::RoundCommitment;

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let store = MemoryBalanceStore::with_balances([("alice", Decimal::new(10, 0))]);

        assert_eq!(store.debit("alice", Decimal::new(4, 0)).await.unwrap(), Decimal::new(6, 0));
        let err = store.debit("alice", Decimal::new(7, 0)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientFunds {
                needed: Decimal::new(7, 0),
                available: Decimal::new(6, 0),
            }
        );
        assert_eq!(store.get("alice"), Decimal::new(6, 0));
    }

    #[tokio::test]
    async fn test_credit_overflow_leaves_balance_untouched() {
        let store = MemoryBalanceStore::with_balances([("whale", Decimal::MAX)]);

        let err = store.credit("whale", Decimal::ONE).await.unwrap_err();
        assert_eq!(err, StoreError::Overflow("whale".to_string()));
        assert!(!err.is_retryable());
        assert_eq!(store.get("whale"), Decimal::MAX);
    }

    #[tokio::test]
    async fn test_concurrent_debits_respect_balance() {
        let store = std::sync::Arc::new(MemoryBalanceStore::with_balances([("bob", Decimal::new(5, 0))]));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.debit("bob", Decimal::ONE).await.is_ok() }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 5);
        assert_eq!(store.get("bob"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_finalize_checks_commitment() {
        let store = MemoryRoundStore::new();
        let commitment = RoundCommitment::from_secret([3u8; 32], 25);
        let id = store
            .create_round(commitment.crash_point, &commitment.secret_hex(), &commitment.hash)
            .await
            .unwrap();

        let wrong = hex::encode([4u8; 32]);
        assert!(matches!(store.finalize_round(id, &wrong).await, Err(StoreError::Corrupted(_))));

        store.finalize_round(id, &commitment.secret_hex()).await.unwrap();
        assert!(store.load_round(id).await.unwrap().unwrap().revealed);
        assert_eq!(store.load_recent_history(10).await.unwrap(), vec![commitment.crash_point]);
    }

    #[tokio::test]
    async fn test_repeated_create_returns_the_same_round() {
        let store = MemoryRoundStore::new();
        let commitment = RoundCommitment::from_secret([5u8; 32], 25);
        let secret = commitment.secret_hex();

        let first = store
            .create_round(commitment.crash_point, &secret, &commitment.hash)
            .await
            .unwrap();
        let second = store
            .create_round(commitment.crash_point, &secret, &commitment.hash)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.round_count(), 1);
    }

    #[tokio::test]
    async fn test_voided_round_is_revealed_but_not_history() {
        let store = MemoryRoundStore::new();
        let crashed = RoundCommitment::from_secret([6u8; 32], 25);
        let interrupted = RoundCommitment::from_secret([7u8; 32], 25);

        let a = store
            .create_round(crashed.crash_point, &crashed.secret_hex(), &crashed.hash)
            .await
            .unwrap();
        store.finalize_round(a, &crashed.secret_hex()).await.unwrap();
        let b = store
            .create_round(interrupted.crash_point, &interrupted.secret_hex(), &interrupted.hash)
            .await
            .unwrap();
        store.void_round(b, &interrupted.secret_hex()).await.unwrap();

        let voided = store.load_round(b).await.unwrap().unwrap();
        assert!(voided.revealed && voided.voided);
        assert_eq!(store.load_recent_history(10).await.unwrap(), vec![crashed.crash_point]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryRoundStore::new();
        store.fail_next_creates(1);

        assert!(store.create_round(Decimal::new(150, 2), "00", "h").await.is_err());
        assert!(store.create_round(Decimal::new(150, 2), "00", "h").await.is_ok());
    }

    #[tokio::test]
    async fn test_history_is_oldest_first_and_limited() {
        let store = MemoryRoundStore::with_history((1..=5).map(|i| Decimal::new(100 + i, 2)));
        let history = store.load_recent_history(3).await.unwrap();
        assert_eq!(history, vec![Decimal::new(103, 2), Decimal::new(104, 2), Decimal::new(105, 2)]);
    }
}
