//! Crash Engine - real-time provably fair crash-game rounds
//!
//! One owned round engine cycles WAITING → RUNNING → CRASHED, commits to each
//! round's outcome before taking bets, settles bets against a transactional
//! balance store, and streams immutable snapshots to observers.

pub mod api;
pub mod backoff;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod history;
pub mod ledger;
pub mod metrics;
pub mod store;
pub mod types;

pub use broadcast::{Broadcaster, RoundSnapshot};
pub use config::{ConfigLoader, EngineConfig, GameConfig};
pub use engine::{Engine, EngineHandle, EngineRuntime, RoundEngine};
pub use errors::{BetError, EngineError, EngineResult, StoreError};
pub use metrics::EngineMetrics;
pub use types::{Bet, BetReceipt, BetRequest, BetStatus, CashOutReceipt, Phase, RoundId};
