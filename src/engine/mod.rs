//! Round engine: one owned actor per process, reached through a mailbox.

pub mod actor;
pub mod ingress;
pub mod phase;

pub use actor::RoundEngine;
pub use ingress::{Command, EngineHandle};
pub use phase::{evaluate_tick, multiplier_at, TickOutcome};

use crate::broadcast::Broadcaster;
use crate::config::GameConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{CommitmentSource, OsRngCommitments};
use crate::metrics::EngineMetrics;
use crate::store::{BalanceStore, RoundStore};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

/// A started engine: its mailbox, its snapshot feed and its teardown hook
pub struct EngineRuntime {
    pub handle: EngineHandle,
    pub broadcaster: Broadcaster,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EngineRuntime {
    /// Cancel pending timers, close observer streams and join the actor
    pub async fn shutdown(mut self) -> EngineResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task
            .await
            .map_err(|e| EngineError::Invariant(format!("engine task failed: {}", e)))?;
        info!("Round engine stopped");
        Ok(())
    }
}

pub struct Engine;

impl Engine {
    /// Start with OS-random commitments
    pub fn start(
        config: GameConfig,
        balances: Arc<dyn BalanceStore>,
        rounds: Arc<dyn RoundStore>,
        metrics: Arc<EngineMetrics>,
    ) -> EngineRuntime {
        Self::start_with(config, balances, rounds, metrics, Box::new(OsRngCommitments))
    }

    pub fn start_with(
        config: GameConfig,
        balances: Arc<dyn BalanceStore>,
        rounds: Arc<dyn RoundStore>,
        metrics: Arc<EngineMetrics>,
        commitments: Box<dyn CommitmentSource>,
    ) -> EngineRuntime {
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let broadcaster = Broadcaster::new(config.broadcast_capacity, metrics.clone());

        let engine = RoundEngine::new(config, balances, rounds, broadcaster.clone(), metrics, commitments);
        let task = tokio::spawn(engine.run(mailbox, shutdown_rx));

        EngineRuntime {
            handle: EngineHandle::new(sender),
            broadcaster,
            shutdown: Some(shutdown),
            task,
        }
    }
}
