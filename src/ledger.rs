//! Registry of the current round's bets.
//!
//! A derived cache over the round store, reset at every WAITING phase. Each
//! stake is debited exactly once (at placement) and each payout credited
//! exactly once (at cash-out); a bet is never mutated after it is final.

use crate::errors::BetError;
use crate::store::BalanceStore;
use crate::types::{Bet, BetStatus, Phase, UserId};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Lowest accepted auto cash-out target
pub const MIN_AUTO_CASH_OUT: Decimal = Decimal::from_parts(101, 0, 0, false, 2);

/// Largest stake any bet may carry, whatever the configured maximum (1e12).
/// Times the largest derivable crash point it still fits in a `Decimal`.
pub const MAX_STAKE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Stake and payout sums for one round
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerTotals {
    pub staked: Decimal,
    pub staked_open: Decimal,
    pub staked_cashed_out: Decimal,
    pub staked_lost: Decimal,
    pub paid_out: Decimal,
}

#[derive(Debug, Clone)]
pub struct BetLedger {
    min_bet: Decimal,
    max_bet: Option<Decimal>,
    bets: Vec<Bet>,
    index: HashMap<UserId, usize>,
}

/// Payout for `stake` at `multiplier`, truncated to cents.
/// `None` when the product does not fit in a `Decimal`.
pub fn payout_for(stake: Decimal, multiplier: Decimal) -> Option<Decimal> {
    stake
        .checked_mul(multiplier)
        .map(|payout| payout.round_dp_with_strategy(2, RoundingStrategy::ToZero))
}

impl BetLedger {
    pub fn new(min_bet: Decimal, max_bet: Option<Decimal>) -> Self {
        Self {
            min_bet,
            max_bet,
            bets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Drop every bet; called when a new round begins
    pub fn reset(&mut self) {
        self.bets.clear();
        self.index.clear();
    }

    fn validate(&self, user_id: &str, amount: Decimal, auto_cash_out: Option<Decimal>) -> Result<(), BetError> {
        if amount <= Decimal::ZERO {
            return Err(BetError::InvalidAmount(amount));
        }
        if amount < self.min_bet {
            return Err(BetError::BelowMinimum {
                amount,
                minimum: self.min_bet,
            });
        }
        let maximum = self.max_bet.map_or(MAX_STAKE, |m| m.min(MAX_STAKE));
        if amount > maximum {
            return Err(BetError::AboveMaximum { amount, maximum });
        }
        if let Some(target) = auto_cash_out {
            if target < MIN_AUTO_CASH_OUT {
                return Err(BetError::InvalidAutoCashOut(target));
            }
        }
        if self.index.contains_key(user_id) {
            return Err(BetError::DuplicateBet(user_id.to_string()));
        }
        Ok(())
    }

    /// Validate, debit the stake, and register the bet as placed.
    /// Returns the bet and the user's new balance.
    pub async fn place_bet(
        &mut self,
        phase: Phase,
        balances: &dyn BalanceStore,
        user_id: &str,
        amount: Decimal,
        auto_cash_out: Option<Decimal>,
    ) -> Result<(Bet, Decimal), BetError> {
        if phase != Phase::Waiting {
            return Err(BetError::WrongPhase {
                action: "place a bet",
                phase,
            });
        }
        self.validate(user_id, amount, auto_cash_out)?;

        let balance = balances.debit(user_id, amount).await?;

        let bet = Bet {
            user_id: user_id.to_string(),
            amount,
            status: BetStatus::Placed,
            auto_cash_out: auto_cash_out.map(|t| t.round_dp_with_strategy(2, RoundingStrategy::ToZero)),
            cash_out_multiplier: None,
            payout: None,
            placed_at: Utc::now(),
        };
        self.index.insert(bet.user_id.clone(), self.bets.len());
        self.bets.push(bet.clone());

        Ok((bet, balance))
    }

    /// Credit `stake * multiplier` and finalize the bet as cashed out.
    /// On a failed credit the bet stays placed and nothing is recorded.
    pub async fn cash_out(
        &mut self,
        phase: Phase,
        balances: &dyn BalanceStore,
        user_id: &str,
        multiplier: Decimal,
    ) -> Result<(Bet, Decimal), BetError> {
        if phase != Phase::Running {
            return Err(BetError::WrongPhase {
                action: "cash out",
                phase,
            });
        }

        let slot = self
            .index
            .get(user_id)
            .copied()
            .filter(|&i| self.bets[i].status == BetStatus::Placed)
            .ok_or_else(|| BetError::NoActiveBet(user_id.to_string()))?;

        let stake = self.bets[slot].amount;
        let payout = payout_for(stake, multiplier)
            .ok_or_else(|| BetError::Overflow(format!("{} x {}", stake, multiplier)))?;
        let balance = balances.credit(user_id, payout).await?;

        let bet = &mut self.bets[slot];
        bet.status = BetStatus::CashedOut;
        bet.cash_out_multiplier = Some(multiplier);
        bet.payout = Some(payout);

        Ok((bet.clone(), balance))
    }

    /// Auto cash-outs due at `live`: targets reached and strictly below the crash point
    pub fn due_auto_cash_outs(&self, live: Decimal, crash_point: Decimal) -> Vec<(UserId, Decimal)> {
        self.bets
            .iter()
            .filter(|b| b.status == BetStatus::Placed)
            .filter_map(|b| b.auto_cash_out.map(|target| (b, target)))
            .filter(|(_, target)| *target <= live && *target < crash_point)
            .map(|(b, target)| (b.user_id.clone(), target))
            .collect()
    }

    /// Flip every placed bet to lost; stakes stay debited. Returns the newly lost bets.
    pub fn settle_round(&mut self) -> Vec<Bet> {
        let mut lost = Vec::new();
        for bet in self.bets.iter_mut().filter(|b| b.status == BetStatus::Placed) {
            bet.status = BetStatus::Lost;
            lost.push(bet.clone());
        }
        lost
    }

    /// Remove and return every still-placed bet (aborted round refunds)
    pub fn take_placed(&mut self) -> Vec<Bet> {
        let (placed, kept): (Vec<Bet>, Vec<Bet>) =
            self.bets.drain(..).partition(|b| b.status == BetStatus::Placed);

        self.index = kept
            .iter()
            .enumerate()
            .map(|(i, b)| (b.user_id.clone(), i))
            .collect();
        self.bets = kept;
        placed
    }

    pub fn get(&self, user_id: &str) -> Option<&Bet> {
        self.index.get(user_id).map(|&i| &self.bets[i])
    }

    /// Bets in placement order
    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    pub fn totals(&self) -> LedgerTotals {
        self.bets.iter().fold(LedgerTotals::default(), |mut t, bet| {
            t.staked += bet.amount;
            match bet.status {
                BetStatus::Placed => t.staked_open += bet.amount,
                BetStatus::CashedOut => {
                    t.staked_cashed_out += bet.amount;
                    t.paid_out += bet.payout.unwrap_or_default();
                }
                BetStatus::Lost => t.staked_lost += bet.amount,
            }
            t
        })
    }
}
