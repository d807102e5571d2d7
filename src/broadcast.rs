//! Snapshot fan-out to observers.
//!
//! The engine publishes an immutable `Arc<RoundSnapshot>` after every
//! transition, tick, bet and cash-out. Publishing never awaits: a slow observer
//! lags on its own receiver and skips stale snapshots without touching the
//! engine or other observers.

use crate::metrics::EngineMetrics;
use crate::types::{BetStatus, Phase, RoundId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Participant row in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub masked_address: String,
    pub bet: f64,
    pub status: BetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_at: Option<f64>,
}

/// Immutable view of round state pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    pub multiplier: f64,
    /// Only present once the round has resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
    pub history: Vec<f64>,
    pub players: Vec<PlayerView>,
    pub time_remaining_ms: u64,
    pub hashed_server_seed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_secret: Option<String>,
}

impl RoundSnapshot {
    /// Snapshot shown before the first round begins
    pub fn connecting() -> Self {
        Self {
            phase: Phase::Connecting,
            round_id: None,
            multiplier: 1.0,
            crash_point: None,
            history: Vec::new(),
            players: Vec::new(),
            time_remaining_ms: 0,
            hashed_server_seed: String::new(),
            revealed_secret: None,
        }
    }
}

/// Display conversion for money and multipliers
pub fn to_display(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Mask a wallet address or user id for public display
pub fn mask_address(user_id: &str) -> String {
    let chars: Vec<char> = user_id.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        let head: String = chars.iter().take(2).collect();
        format!("{}***", head)
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<RoundSnapshot>>,
    latest: Arc<RwLock<Arc<RoundSnapshot>>>,
    closed: watch::Sender<bool>,
    metrics: Arc<EngineMetrics>,
}

impl Broadcaster {
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            latest: Arc::new(RwLock::new(Arc::new(RoundSnapshot::connecting()))),
            closed,
            metrics,
        }
    }

    pub fn publish(&self, snapshot: RoundSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.latest.write() {
            Ok(mut latest) => *latest = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }

        EngineMetrics::incr(&self.metrics.snapshots_published);
        if self.tx.send(snapshot).is_err() {
            debug!("No observers connected for snapshot");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RoundSnapshot>> {
        self.tx.subscribe()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Arc<RoundSnapshot> {
        match self.latest.read() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Signal every observer stream to end
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(multiplier: f64) -> RoundSnapshot {
        RoundSnapshot {
            phase: Phase::Running,
            multiplier,
            ..RoundSnapshot::connecting()
        }
    }

    #[test]
    fn test_mask_address() {
        assert_eq!(mask_address("0x1234567890abcdef"), "0x1234...cdef");
        assert_eq!(mask_address("alice"), "al***");
        assert_eq!(mask_address("a"), "a***");
        assert_eq!(mask_address("0123456789"), "01***");
    }

    #[test]
    fn test_snapshot_wire_format() {
        let mut snap = snapshot(1.5);
        snap.players.push(PlayerView {
            masked_address: "al***".to_string(),
            bet: 10.0,
            status: BetStatus::CashedOut,
            payout: Some(15.0),
            cash_out_at: Some(1.5),
        });
        let json = serde_json::to_value(&snap).unwrap();

        assert_eq!(json["phase"], "RUNNING");
        assert_eq!(json["timeRemainingMs"], 0);
        assert_eq!(json["players"][0]["cashOutAt"], 1.5);
        assert_eq!(json["players"][0]["status"], "cashed_out");
        assert!(json.get("crashPoint").is_none());
        assert!(json.get("revealedSecret").is_none());
    }

    #[tokio::test]
    async fn test_publish_without_observers_updates_latest() {
        let broadcaster = Broadcaster::new(4, Arc::new(EngineMetrics::new()));
        broadcaster.publish(snapshot(1.2));
        assert_eq!(broadcaster.latest().multiplier, 1.2);
    }

    #[tokio::test]
    async fn test_lagging_observer_does_not_block_publisher() {
        let broadcaster = Broadcaster::new(2, Arc::new(EngineMetrics::new()));
        let mut slow = broadcaster.subscribe();

        for i in 0..10 {
            broadcaster.publish(snapshot(1.0 + i as f64 / 10.0));
        }

        assert!(matches!(slow.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
        let next = slow.recv().await.unwrap();
        assert!(next.multiplier > 1.7);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let broadcaster = Broadcaster::new(2, Arc::new(EngineMetrics::new()));
        let waiter = {
            let b = broadcaster.clone();
            tokio::spawn(async move { b.closed().await })
        };

        broadcaster.close();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(broadcaster.is_closed());
    }
}
