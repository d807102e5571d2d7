//! The round state machine.
//!
//! `RoundEngine` owns every piece of round state: phase, commitment, ledger,
//! history and the single phase deadline plus ticker. Bets, cash-outs and
//! ticks all run on the one task that owns it, so "crash detected" and
//! "cash-out requested" are totally ordered. Entering a phase always drops the
//! previous deadline and ticker before scheduling new ones.

use super::ingress::Command;
use super::phase::{evaluate_tick, multiplier_at, remaining_ms, TickOutcome};
use crate::backoff::{with_retry, RetryPolicy};
use crate::broadcast::{mask_address, to_display, Broadcaster, PlayerView, RoundSnapshot};
use crate::config::GameConfig;
use crate::errors::{BetError, EngineError, EngineResult};
use crate::fairness::{CommitmentSource, RoundCommitment};
use crate::history::HistoryCache;
use crate::ledger::BetLedger;
use crate::metrics::EngineMetrics;
use crate::store::{BalanceStore, RoundStore};
use crate::types::{BetReceipt, BetRequest, BetStatus, CashOutReceipt, Phase, RoundId};
use futures::FutureExt;
use rust_decimal::Decimal;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commitment and timing of the round in progress
struct ActiveRound {
    commitment: RoundCommitment,
    round_id: Option<RoundId>,
    started_at: Option<Instant>,
}

pub struct RoundEngine {
    config: GameConfig,
    balances: Arc<dyn BalanceStore>,
    rounds: Arc<dyn RoundStore>,
    broadcaster: Broadcaster,
    metrics: Arc<EngineMetrics>,
    commitments: Box<dyn CommitmentSource>,
    retry: RetryPolicy,

    phase: Phase,
    round: Option<ActiveRound>,
    ledger: BetLedger,
    history: HistoryCache,
    multiplier: Decimal,

    deadline: Option<Instant>,
    ticker: Option<Interval>,
}

impl RoundEngine {
    pub fn new(
        config: GameConfig,
        balances: Arc<dyn BalanceStore>,
        rounds: Arc<dyn RoundStore>,
        broadcaster: Broadcaster,
        metrics: Arc<EngineMetrics>,
        commitments: Box<dyn CommitmentSource>,
    ) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            ledger: BetLedger::new(config.min_bet, config.max_bet),
            history: HistoryCache::new(config.history_capacity),
            config,
            balances,
            rounds,
            broadcaster,
            metrics,
            commitments,
            phase: Phase::Connecting,
            round: None,
            multiplier: Decimal::ONE,
            deadline: None,
            ticker: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    /// Last broadcast multiplier
    pub fn multiplier(&self) -> Decimal {
        self.multiplier
    }

    pub fn round_id(&self) -> Option<RoundId> {
        self.round.as_ref().and_then(|r| r.round_id)
    }

    pub fn public_hash(&self) -> Option<&str> {
        self.round.as_ref().map(|r| r.commitment.hash.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_ticker(&self) -> bool {
        self.ticker.is_some()
    }

    /// CONNECTING: seed the history cache from the round store.
    /// A store outage here starts the engine with an empty history.
    pub async fn connect(&mut self) {
        self.phase = Phase::Connecting;
        let rounds = self.rounds.clone();
        let limit = self.config.history_capacity;

        match with_retry("load_recent_history", self.retry, || rounds.load_recent_history(limit)).await {
            Ok(crash_points) => {
                info!(rounds = crash_points.len(), "Loaded recent crash history");
                self.history = HistoryCache::seeded(limit, crash_points);
            }
            Err(e) => {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                warn!(error = %e, "Could not load crash history; starting empty");
            }
        }
        self.broadcaster.publish(self.snapshot(Instant::now()));
    }

    fn cancel_timers(&mut self) {
        self.deadline = None;
        self.ticker = None;
    }

    fn start_ticker(&mut self, now: Instant) {
        let period = self.config.tick();
        let mut ticker = interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    /// WAITING: commit to a fresh secret, publish its hash and open betting
    pub fn enter_waiting(&mut self, now: Instant) {
        self.cancel_timers();

        let commitment = self.commitments.next_commitment(self.config.instant_bust_modulus);
        info!(hash = %commitment.hash, "Round waiting for bets");

        self.ledger.reset();
        self.multiplier = Decimal::ONE;
        self.round = Some(ActiveRound {
            commitment,
            round_id: None,
            started_at: None,
        });
        self.phase = Phase::Waiting;

        self.deadline = Some(now + self.config.waiting());
        self.start_ticker(now);
        self.publish(now);
    }

    /// RUNNING: persist the round before the first tick, or abort back to WAITING.
    /// The clock for the next phase starts once the store has answered.
    pub async fn enter_running(&mut self, now: Instant) -> EngineResult<()> {
        self.cancel_timers();
        let persisting = Instant::now();

        let (crash_point, secret, hash) = {
            let round = self
                .round
                .as_ref()
                .ok_or_else(|| EngineError::Invariant("entering RUNNING without a commitment".to_string()))?;
            (
                round.commitment.crash_point,
                round.commitment.secret_hex(),
                round.commitment.hash.clone(),
            )
        };

        let rounds = self.rounds.clone();
        let created = with_retry("create_round", self.retry, || {
            rounds.create_round(crash_point, &secret, &hash)
        })
        .await;

        let round_id = match created {
            Ok(id) => id,
            Err(e) => {
                EngineMetrics::incr(&self.metrics.rounds_aborted);
                EngineMetrics::incr(&self.metrics.persistence_failures);
                error!(error = %e, hash = %hash, "Round could not be recorded; aborting to WAITING");
                self.refund_placed().await;
                self.enter_waiting(now + persisting.elapsed());
                return Ok(());
            }
        };

        let audit = self.retry.retry_once();
        for bet in self.ledger.bets() {
            let record = bet.to_record(round_id);
            if let Err(e) = with_retry("record_bet", audit, || rounds.record_bet(&record)).await {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                error!(round_id = %round_id, user = %bet.user_id, error = %e, "Failed to record placed bet");
            }
        }

        let started_at = now + persisting.elapsed();
        if let Some(round) = self.round.as_mut() {
            round.round_id = Some(round_id);
            round.started_at = Some(started_at);
        }
        self.phase = Phase::Running;
        self.multiplier = Decimal::ONE;

        EngineMetrics::incr(&self.metrics.rounds_started);
        if crash_point == Decimal::ONE {
            EngineMetrics::incr(&self.metrics.instant_busts);
        }
        info!(round_id = %round_id, bets = self.ledger.len(), "Round running");

        self.start_ticker(started_at);
        self.publish(started_at);
        Ok(())
    }

    /// CRASHED: settle, persist, reveal and start the cooldown
    pub async fn enter_crashed(&mut self, now: Instant) -> EngineResult<()> {
        self.cancel_timers();

        let (round_id, crash_point, secret) = {
            let round = self
                .round
                .as_ref()
                .ok_or_else(|| EngineError::Invariant("crashing without an active round".to_string()))?;
            (round.round_id, round.commitment.crash_point, round.commitment.secret_hex())
        };

        self.phase = Phase::Crashed;
        self.multiplier = crash_point;

        let lost = self.ledger.settle_round();
        EngineMetrics::add(&self.metrics.bets_lost, lost.len() as u64);
        EngineMetrics::incr(&self.metrics.rounds_crashed);

        if let Some(round_id) = round_id {
            let rounds = self.rounds.clone();
            if let Err(e) = with_retry("bulk_mark_lost", self.retry, || rounds.bulk_mark_lost(round_id)).await {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                error!(round_id = %round_id, error = %e, "Failed to mark lost bets");
            }
            if let Err(e) = with_retry("finalize_round", self.retry, || rounds.finalize_round(round_id, &secret)).await
            {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                error!(round_id = %round_id, error = %e, "Failed to finalize round");
            }
        }

        self.history.push(crash_point);
        info!(
            round_id = ?round_id.map(|id| id.0),
            crash_point = %crash_point,
            lost = lost.len(),
            "Round crashed"
        );

        self.deadline = Some(now + self.config.cooldown());
        self.start_ticker(now);
        self.publish(now);
        Ok(())
    }

    /// Phase deadline fired
    pub async fn on_deadline(&mut self, now: Instant) -> EngineResult<()> {
        match self.phase {
            Phase::Waiting => self.enter_running(now).await,
            Phase::Crashed | Phase::Connecting => {
                self.enter_waiting(now);
                Ok(())
            }
            Phase::Running => Err(EngineError::Invariant("phase deadline armed while RUNNING".to_string())),
        }
    }

    /// Ticker fired: advance the multiplier, or refresh the countdown
    pub async fn on_tick(&mut self, now: Instant) -> EngineResult<()> {
        match self.phase {
            Phase::Running => self.advance(now).await,
            Phase::Waiting | Phase::Crashed => {
                self.publish(now);
                Ok(())
            }
            Phase::Connecting => Ok(()),
        }
    }

    fn running_round(&self) -> EngineResult<(Instant, Decimal)> {
        self.round
            .as_ref()
            .and_then(|r| r.started_at.map(|started| (started, r.commitment.crash_point)))
            .ok_or_else(|| EngineError::Invariant("RUNNING without a start time".to_string()))
    }

    async fn advance(&mut self, now: Instant) -> EngineResult<()> {
        let (started_at, crash_point) = self.running_round()?;
        let elapsed = now.saturating_duration_since(started_at);
        let growth = self.config.growth_base;

        let live = multiplier_at(growth, elapsed);
        for (user, target) in self.ledger.due_auto_cash_outs(live, crash_point) {
            match self.settle_cash_out(&user, target).await {
                Ok(_) => EngineMetrics::incr(&self.metrics.auto_cash_outs),
                Err(e) => warn!(user = %user, target = %target, error = %e, "Auto cash-out failed"),
            }
        }

        match evaluate_tick(growth, elapsed, crash_point) {
            TickOutcome::Rising(multiplier) => {
                self.multiplier = multiplier;
                self.publish(now);
                Ok(())
            }
            TickOutcome::Crashed(_) => self.enter_crashed(now).await,
        }
    }

    pub async fn place_bet(&mut self, request: BetRequest, now: Instant) -> Result<BetReceipt, BetError> {
        let placed = self
            .ledger
            .place_bet(
                self.phase,
                self.balances.as_ref(),
                &request.user_id,
                request.amount,
                request.auto_cash_out,
            )
            .await;

        match placed {
            Ok((bet, balance)) => {
                EngineMetrics::incr(&self.metrics.bets_placed);
                info!(user = %bet.user_id, amount = %bet.amount, "Bet placed");
                self.publish(now);
                Ok(BetReceipt {
                    user_id: bet.user_id,
                    amount: bet.amount,
                    balance,
                    hashed_server_seed: self.public_hash().unwrap_or_default().to_string(),
                })
            }
            Err(e) => {
                EngineMetrics::incr(&self.metrics.bets_rejected);
                debug!(user = %request.user_id, amount = %request.amount, error = %e, "Bet rejected");
                Err(e)
            }
        }
    }

    /// Cash out at the multiplier sampled now. A request that arrives once
    /// the live multiplier has reached the crash point is too late.
    pub async fn cash_out(&mut self, user_id: &str, now: Instant) -> Result<CashOutReceipt, BetError> {
        let result = self.try_cash_out(user_id, now).await;
        match &result {
            Ok(receipt) => {
                info!(user = %user_id, multiplier = %receipt.multiplier, payout = %receipt.payout, "Cashed out");
                self.publish(now);
            }
            Err(e) => {
                EngineMetrics::incr(&self.metrics.bets_rejected);
                debug!(user = %user_id, error = %e, "Cash-out rejected");
            }
        }
        result
    }

    async fn try_cash_out(&mut self, user_id: &str, now: Instant) -> Result<CashOutReceipt, BetError> {
        if self.phase != Phase::Running {
            return Err(BetError::WrongPhase {
                action: "cash out",
                phase: self.phase,
            });
        }
        if self.ledger.get(user_id).map(|b| b.status) != Some(BetStatus::Placed) {
            return Err(BetError::NoActiveBet(user_id.to_string()));
        }

        let (started_at, crash_point) = self.running_round().map_err(|_| BetError::EngineUnavailable)?;
        let live = multiplier_at(self.config.growth_base, now.saturating_duration_since(started_at));
        if live >= crash_point {
            return Err(BetError::TooLate);
        }

        self.settle_cash_out(user_id, live).await
    }

    /// Credit the payout, then write the audit record. The credit stands even
    /// if the record cannot be written.
    async fn settle_cash_out(&mut self, user_id: &str, multiplier: Decimal) -> Result<CashOutReceipt, BetError> {
        let (bet, balance) = self
            .ledger
            .cash_out(self.phase, self.balances.as_ref(), user_id, multiplier)
            .await?;
        EngineMetrics::incr(&self.metrics.cash_outs);

        let round_id = self.round_id();
        let mut audit_persisted = false;
        if let Some(round_id) = round_id {
            let rounds = self.rounds.clone();
            let record = bet.to_record(round_id);
            match with_retry("record_bet", self.retry.retry_once(), || rounds.record_bet(&record)).await {
                Ok(()) => audit_persisted = true,
                Err(e) => {
                    EngineMetrics::incr(&self.metrics.persistence_failures);
                    error!(
                        round_id = %round_id,
                        user = %user_id,
                        payout = %bet.payout.unwrap_or_default(),
                        error = %e,
                        "Cash-out credited but audit record failed"
                    );
                }
            }
        }

        Ok(CashOutReceipt {
            user_id: bet.user_id,
            round_id,
            multiplier,
            payout: bet.payout.unwrap_or_default(),
            balance,
            audit_persisted,
        })
    }

    /// Return every still-placed stake. Each refund is a single credit.
    async fn refund_placed(&mut self) {
        for bet in self.ledger.take_placed() {
            match self.balances.credit(&bet.user_id, bet.amount).await {
                Ok(balance) => {
                    EngineMetrics::incr(&self.metrics.refunds);
                    info!(user = %bet.user_id, amount = %bet.amount, balance = %balance, "Stake refunded");
                }
                Err(e) => {
                    EngineMetrics::incr(&self.metrics.persistence_failures);
                    error!(user = %bet.user_id, amount = %bet.amount, error = %e, "Stake refund failed");
                }
            }
        }
    }

    /// Recover from a failed or panicked step: refund open stakes, void and
    /// reveal the round if it was recorded, and start a fresh WAITING phase.
    pub async fn restart_cycle(&mut self, now: Instant, reason: &str) {
        EngineMetrics::incr(&self.metrics.tick_restarts);
        error!(phase = %self.phase, reason, "Engine step failed; restarting phase cycle");
        self.cancel_timers();
        let recovering = Instant::now();

        if matches!(self.phase, Phase::Waiting | Phase::Running) {
            self.refund_placed().await;
        }

        let recorded = self
            .round
            .as_ref()
            .and_then(|r| r.round_id.map(|id| (id, r.commitment.secret_hex())));
        if let (Some((round_id, secret)), Phase::Running) = (recorded, self.phase) {
            let rounds = self.rounds.clone();
            if let Err(e) = with_retry("void_round", self.retry, || rounds.void_round(round_id, &secret)).await {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                error!(round_id = %round_id, error = %e, "Failed to void interrupted round");
            }
        }

        self.enter_waiting(now + recovering.elapsed());
    }

    pub fn snapshot(&self, now: Instant) -> RoundSnapshot {
        let crashed = self.phase == Phase::Crashed;
        let players = self
            .ledger
            .bets()
            .iter()
            .map(|bet| PlayerView {
                masked_address: mask_address(&bet.user_id),
                bet: to_display(bet.amount),
                status: bet.status,
                payout: bet.payout.map(to_display),
                cash_out_at: bet.cash_out_multiplier.map(to_display),
            })
            .collect();

        RoundSnapshot {
            phase: self.phase,
            round_id: self.round_id(),
            multiplier: to_display(self.multiplier),
            crash_point: self
                .round
                .as_ref()
                .filter(|_| crashed)
                .map(|r| to_display(r.commitment.crash_point)),
            history: self.history.snapshot().into_iter().map(to_display).collect(),
            players,
            time_remaining_ms: match self.phase {
                Phase::Waiting | Phase::Crashed => remaining_ms(self.deadline, now),
                _ => 0,
            },
            hashed_server_seed: self.public_hash().unwrap_or_default().to_string(),
            revealed_secret: self
                .round
                .as_ref()
                .filter(|_| crashed)
                .map(|r| r.commitment.secret_hex()),
        }
    }

    fn publish(&self, now: Instant) {
        self.broadcaster.publish(self.snapshot(now));
    }

    async fn handle(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::PlaceBet { request, response } => {
                let result = self.place_bet(request, now).await;
                let _ = response.send(result);
            }
            Command::CashOut { user_id, response } => {
                let result = self.cash_out(&user_id, now).await;
                let _ = response.send(result);
            }
        }
    }

    /// Drive the phase cycle until shutdown or until every handle is dropped
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<Command>, mut shutdown: oneshot::Receiver<()>) {
        if self.phase == Phase::Connecting {
            self.connect().await;
            self.enter_waiting(Instant::now());
        }

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Round engine shutting down");
                    break;
                }

                _ = wait_deadline(self.deadline) => {
                    let step = AssertUnwindSafe(self.on_deadline(Instant::now())).catch_unwind().await;
                    self.recover(step).await;
                }

                _ = wait_tick(&mut self.ticker) => {
                    let step = AssertUnwindSafe(self.on_tick(Instant::now())).catch_unwind().await;
                    self.recover(step).await;
                }

                command = mailbox.recv() => match command {
                    Some(command) => {
                        // A panicking request drops its reply; the caller sees EngineUnavailable
                        let step = AssertUnwindSafe(self.handle(command)).catch_unwind().await;
                        self.recover(step.map(Ok)).await;
                    }
                    None => {
                        info!("All engine handles dropped");
                        break;
                    }
                },
            }
        }

        self.cancel_timers();
        mailbox.close();
        self.broadcaster.close();
    }

    async fn recover(&mut self, step: std::thread::Result<EngineResult<()>>) {
        match step {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.restart_cycle(Instant::now(), &e.to_string()).await,
            Err(_) => self.restart_cycle(Instant::now(), "panic in engine step").await,
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
