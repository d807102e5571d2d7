//! RocksDB-backed balance and round store.
//!
//! Uses a `TransactionDB`: every balance mutation takes an exclusive
//! `get_for_update` lock on the user's balance key, checks, writes and commits
//! inside one transaction. Rounds, bets and the history index are JSON rows.
//!
//! Key layout:
//! - `balance:{user}`                          -> decimal string
//! - `round:record:{id(be)}`                   -> RoundRecord
//! - `round:hash:{commitment hash}`            -> round id (be)
//! - `round:index:recent:{inv_id(be)}`         -> crash point (crashed rounds only)
//! - `bet:{round_id(be)}{user}`                -> BetRecord
//! - `round:next_id`                           -> u64 (be)

use super::{BalanceStore, RoundStore};
use crate::config::StorageConfig;
use crate::errors::{StoreError, StoreResult};
use crate::fairness::hash_secret;
use crate::types::{BetRecord, BetStatus, RoundId, RoundRecord};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{Direction, IteratorMode, Options, TransactionDB, TransactionDBOptions};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

const BALANCE_PREFIX: &[u8] = b"balance:";
const ROUND_RECORD_PREFIX: &[u8] = b"round:record:";
const ROUND_HASH_PREFIX: &[u8] = b"round:hash:";
const RECENT_ROUNDS_PREFIX: &[u8] = b"round:index:recent:";
const BET_PREFIX: &[u8] = b"bet:";
const NEXT_ROUND_ID_KEY: &[u8] = b"round:next_id";

/// Lock wait before a contended balance row fails the call
const LOCK_TIMEOUT_MS: i64 = 1_000;

fn balance_key(user_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(BALANCE_PREFIX.len() + user_id.len());
    key.extend_from_slice(BALANCE_PREFIX);
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn round_key(round_id: RoundId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ROUND_RECORD_PREFIX.len() + 8);
    key.extend_from_slice(ROUND_RECORD_PREFIX);
    key.extend_from_slice(&round_id.0.to_be_bytes());
    key
}

fn round_hash_key(hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ROUND_HASH_PREFIX.len() + hash.len());
    key.extend_from_slice(ROUND_HASH_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn recent_round_index_key(round_id: RoundId) -> Vec<u8> {
    // Newest first: inverted id as the sort key
    let inv_id = u64::MAX - round_id.0;
    let mut key = Vec::with_capacity(RECENT_ROUNDS_PREFIX.len() + 8);
    key.extend_from_slice(RECENT_ROUNDS_PREFIX);
    key.extend_from_slice(&inv_id.to_be_bytes());
    key
}

fn bet_prefix(round_id: RoundId) -> Vec<u8> {
    let mut key = Vec::with_capacity(BET_PREFIX.len() + 8);
    key.extend_from_slice(BET_PREFIX);
    key.extend_from_slice(&round_id.0.to_be_bytes());
    key
}

fn bet_key(round_id: RoundId, user_id: &str) -> Vec<u8> {
    let mut key = bet_prefix(round_id);
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn decode_decimal(bytes: &[u8]) -> StoreResult<Decimal> {
    let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    Decimal::from_str(text).map_err(|e| StoreError::Corrupted(format!("bad decimal '{}': {}", text, e)))
}

fn decode_u64(bytes: &[u8]) -> StoreResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupted("expected 8-byte counter".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

#[derive(Clone, Copy)]
enum Adjustment {
    Debit(Decimal),
    Credit(Decimal),
}

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<TransactionDB>,
}

impl RocksStore {
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        if config.clear_on_start {
            let _ = std::fs::remove_dir_all(&config.data_directory);
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let db = TransactionDB::open(&opts, &txn_opts, &config.data_directory)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run blocking RocksDB work off the async executor
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&TransactionDB) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Database(format!("storage task failed: {}", e)))?
    }

    fn adjust(db: &TransactionDB, user_id: &str, adjustment: Adjustment) -> StoreResult<Decimal> {
        let key = balance_key(user_id);
        let txn = db.transaction();

        let current = match txn.get_for_update(&key, true)? {
            Some(bytes) => decode_decimal(&bytes)?,
            None => Decimal::ZERO,
        };

        let updated = match adjustment {
            Adjustment::Debit(amount) => {
                if current < amount {
                    return Err(StoreError::InsufficientFunds {
                        needed: amount,
                        available: current,
                    });
                }
                current.checked_sub(amount)
            }
            Adjustment::Credit(amount) => current.checked_add(amount),
        }
        .ok_or_else(|| StoreError::Overflow(user_id.to_string()))?;

        txn.put(&key, updated.to_string().as_bytes())?;
        txn.commit()?;
        Ok(updated)
    }

    fn scan_prefix(db: &TransactionDB, prefix: &[u8], limit: usize) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Check the secret against the commitment and mark the round revealed.
    /// Only crashed rounds enter the recent-history index.
    async fn reveal(&self, round_id: RoundId, revealed_secret: String, voided: bool) -> StoreResult<()> {
        self.blocking(move |db| {
            let key = round_key(round_id);
            let txn = db.transaction();
            let bytes = txn
                .get_for_update(&key, true)?
                .ok_or_else(|| StoreError::NotFound(format!("round {}", round_id)))?;
            let mut record: RoundRecord = serde_json::from_slice(&bytes)?;

            let secret = hex::decode(&revealed_secret).map_err(|e| StoreError::Corrupted(e.to_string()))?;
            if hash_secret(&secret) != record.hash {
                return Err(StoreError::Corrupted(format!(
                    "revealed secret does not match commitment of round {}",
                    round_id
                )));
            }

            record.revealed = true;
            record.voided = voided;
            record.finalized_at.get_or_insert_with(Utc::now);

            txn.put(&key, serde_json::to_vec(&record)?)?;
            if !voided {
                txn.put(
                    recent_round_index_key(round_id),
                    record.crash_point.to_string().as_bytes(),
                )?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    /// Synchronous credit for operator tooling
    pub fn fund(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal> {
        Self::adjust(&self.db, user_id, Adjustment::Credit(amount))
    }
}

#[async_trait]
impl BalanceStore for RocksStore {
    async fn debit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal> {
        let user_id = user_id.to_string();
        self.blocking(move |db| Self::adjust(db, &user_id, Adjustment::Debit(amount))).await
    }

    async fn credit(&self, user_id: &str, amount: Decimal) -> StoreResult<Decimal> {
        let user_id = user_id.to_string();
        self.blocking(move |db| Self::adjust(db, &user_id, Adjustment::Credit(amount))).await
    }

    async fn balance(&self, user_id: &str) -> StoreResult<Decimal> {
        let key = balance_key(user_id);
        self.blocking(move |db| match db.get(&key)? {
            Some(bytes) => decode_decimal(&bytes),
            None => Ok(Decimal::ZERO),
        })
        .await
    }
}

#[async_trait]
impl RoundStore for RocksStore {
    async fn create_round(&self, crash_point: Decimal, secret: &str, hash: &str) -> StoreResult<RoundId> {
        let secret = secret.to_string();
        let hash = hash.to_string();
        self.blocking(move |db| {
            let txn = db.transaction();
            let hash_key = round_hash_key(&hash);
            if let Some(existing) = txn.get_for_update(&hash_key, true)? {
                return Ok(RoundId(decode_u64(&existing)?));
            }

            let last = match txn.get_for_update(NEXT_ROUND_ID_KEY, true)? {
                Some(bytes) => decode_u64(&bytes)?,
                None => 0,
            };
            let round_id = RoundId(last + 1);

            let record = RoundRecord {
                round_id,
                crash_point,
                secret,
                hash,
                revealed: false,
                voided: false,
                created_at: Utc::now(),
                finalized_at: None,
            };

            txn.put(NEXT_ROUND_ID_KEY, round_id.0.to_be_bytes())?;
            txn.put(&hash_key, round_id.0.to_be_bytes())?;
            txn.put(round_key(round_id), serde_json::to_vec(&record)?)?;
            txn.commit()?;
            Ok(round_id)
        })
        .await
    }

    async fn finalize_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()> {
        self.reveal(round_id, revealed_secret.to_string(), false).await
    }

    async fn void_round(&self, round_id: RoundId, revealed_secret: &str) -> StoreResult<()> {
        self.reveal(round_id, revealed_secret.to_string(), true).await
    }

    async fn record_bet(&self, bet: &BetRecord) -> StoreResult<()> {
        let bet = bet.clone();
        self.blocking(move |db| {
            let bytes = serde_json::to_vec(&bet)?;
            db.put(bet_key(bet.round_id, &bet.user_id), bytes)?;
            Ok(())
        })
        .await
    }

    async fn bulk_mark_lost(&self, round_id: RoundId) -> StoreResult<u64> {
        self.blocking(move |db| {
            let prefix = bet_prefix(round_id);
            let rows = Self::scan_prefix(db, &prefix, usize::MAX)?;

            let txn = db.transaction();
            let mut changed = 0;
            for (key, value) in rows {
                let mut bet: BetRecord = serde_json::from_slice(&value)?;
                if bet.status == BetStatus::Placed {
                    bet.status = BetStatus::Lost;
                    txn.put(&key, serde_json::to_vec(&bet)?)?;
                    changed += 1;
                }
            }
            txn.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn load_recent_history(&self, limit: usize) -> StoreResult<Vec<Decimal>> {
        self.blocking(move |db| {
            let rows = Self::scan_prefix(db, RECENT_ROUNDS_PREFIX, limit)?;
            let mut crash_points = rows
                .iter()
                .map(|(_, value)| decode_decimal(value))
                .collect::<StoreResult<Vec<_>>>()?;
            // Index is newest first; history is oldest first
            crash_points.reverse();
            Ok(crash_points)
        })
        .await
    }

    async fn load_round(&self, round_id: RoundId) -> StoreResult<Option<RoundRecord>> {
        self.blocking(move |db| match db.get(round_key(round_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        })
        .await
    }

    async fn load_bets(&self, round_id: RoundId) -> StoreResult<Vec<BetRecord>> {
        self.blocking(move |db| {
            Self::scan_prefix(db, &bet_prefix(round_id), usize::MAX)?
                .iter()
                .map(|(_, value)| serde_json::from_slice(value).map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::RoundCommitment;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RocksStore) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_directory: dir.path().join("db").to_string_lossy().to_string(),
            clear_on_start: false,
        };
        let store = RocksStore::open(&config).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_balance_debit_and_credit() {
        let (_dir, store) = open_temp();

        store.fund("alice", Decimal::new(25, 0)).unwrap();
        assert_eq!(store.debit("alice", Decimal::new(10, 0)).await.unwrap(), Decimal::new(15, 0));
        assert!(matches!(
            store.debit("alice", Decimal::new(16, 0)).await,
            Err(StoreError::InsufficientFunds { .. })
        ));
        assert_eq!(store.credit("alice", Decimal::new(18, 0)).await.unwrap(), Decimal::new(33, 0));
        assert_eq!(store.balance("alice").await.unwrap(), Decimal::new(33, 0));
        assert_eq!(store.balance("nobody").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_debits_respect_balance() {
        let (_dir, store) = open_temp();
        store.fund("bob", Decimal::new(5, 0)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.debit("bob", Decimal::ONE).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, StoreError::InsufficientFunds { .. }), "unexpected {e}"),
            }
        }

        assert_eq!(successes, 5);
        assert_eq!(store.balance("bob").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_credit_overflow_is_rejected() {
        let (_dir, store) = open_temp();
        store.fund("whale", Decimal::MAX).unwrap();

        let err = store.credit("whale", Decimal::ONE).await.unwrap_err();
        assert_eq!(err, StoreError::Overflow("whale".to_string()));
        assert_eq!(store.balance("whale").await.unwrap(), Decimal::MAX);
    }

    #[tokio::test]
    async fn test_round_lifecycle_and_history() {
        let (_dir, store) = open_temp();

        let mut expected = Vec::new();
        for i in 0..4u8 {
            let commitment = RoundCommitment::from_secret([i; 32], 25);
            let id = store
                .create_round(commitment.crash_point, &commitment.secret_hex(), &commitment.hash)
                .await
                .unwrap();
            assert_eq!(id, RoundId(u64::from(i) + 1));
            store.finalize_round(id, &commitment.secret_hex()).await.unwrap();
            expected.push(commitment.crash_point);
        }

        assert_eq!(store.load_recent_history(10).await.unwrap(), expected);
        assert_eq!(store.load_recent_history(2).await.unwrap(), expected[2..].to_vec());

        let round = store.load_round(RoundId(2)).await.unwrap().unwrap();
        assert!(round.revealed);
        assert!(round.finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_unfinalized_rounds_stay_out_of_history() {
        let (_dir, store) = open_temp();
        let commitment = RoundCommitment::from_secret([1; 32], 25);
        store
            .create_round(commitment.crash_point, &commitment.secret_hex(), &commitment.hash)
            .await
            .unwrap();

        assert!(store.load_recent_history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_is_keyed_by_commitment_hash() {
        let (_dir, store) = open_temp();
        let commitment = RoundCommitment::from_secret([2; 32], 25);
        let secret = commitment.secret_hex();

        let first = store
            .create_round(commitment.crash_point, &secret, &commitment.hash)
            .await
            .unwrap();
        let again = store
            .create_round(commitment.crash_point, &secret, &commitment.hash)
            .await
            .unwrap();
        assert_eq!(first, again);

        let next = RoundCommitment::from_secret([3; 32], 25);
        let second = store
            .create_round(next.crash_point, &next.secret_hex(), &next.hash)
            .await
            .unwrap();
        assert_eq!(second, RoundId(first.0 + 1));
    }

    #[tokio::test]
    async fn test_voided_round_stays_out_of_history() {
        let (_dir, store) = open_temp();
        let crashed = RoundCommitment::from_secret([4; 32], 25);
        let interrupted = RoundCommitment::from_secret([5; 32], 25);

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
        assert!(voided.revealed);
        assert!(voided.voided);
        assert_eq!(store.load_recent_history(10).await.unwrap(), vec![crashed.crash_point]);
    }

    #[tokio::test]
    async fn test_bulk_mark_lost_only_touches_placed_bets() {
        let (_dir, store) = open_temp();
        let round_id = RoundId(7);

        let placed = BetRecord {
            round_id,
            user_id: "alice".to_string(),
            amount: Decimal::new(5, 0),
            status: BetStatus::Placed,
            multiplier: None,
            payout: None,
        };
        let cashed = BetRecord {
            user_id: "bob".to_string(),
            status: BetStatus::CashedOut,
            multiplier: Some(Decimal::new(180, 2)),
            payout: Some(Decimal::new(1800, 2)),
            ..placed.clone()
        };
        let other_round = BetRecord {
            round_id: RoundId(8),
            ..placed.clone()
        };

        for bet in [&placed, &cashed, &other_round] {
            store.record_bet(bet).await.unwrap();
        }

        assert_eq!(store.bulk_mark_lost(round_id).await.unwrap(), 1);

        let bets = store.load_bets(round_id).await.unwrap();
        assert_eq!(bets.len(), 2);
        assert_eq!(bets[0].status, BetStatus::Lost);
        assert_eq!(bets[1].status, BetStatus::CashedOut);
        assert_eq!(store.load_bets(RoundId(8)).await.unwrap()[0].status, BetStatus::Placed);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_directory: dir.path().join("db").to_string_lossy().to_string(),
            clear_on_start: false,
        };

        {
            let store = RocksStore::open(&config).unwrap();
            store.fund("carol", Decimal::new(42, 0)).unwrap();
        }

        let reopened = RocksStore::open(&config).unwrap();
        assert_eq!(reopened.balance("carol").await.unwrap(), Decimal::new(42, 0));
    }
}
