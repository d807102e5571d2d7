//! Pure multiplier math for the tick loop

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::Duration;
use tokio::time::Instant;

/// Result of evaluating one tick of a running round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still below the crash point; carries the live multiplier
    Rising(Decimal),
    /// Reached the crash point; carries the crash point itself
    Crashed(Decimal),
}

/// `growth_base ^ elapsed_secs`, truncated to two decimals, never below 1.00
pub fn multiplier_at(growth_base: f64, elapsed: Duration) -> Decimal {
    let raw = growth_base.powf(elapsed.as_secs_f64());
    let live = Decimal::from_f64(raw).unwrap_or(Decimal::MAX);
    live.round_dp_with_strategy(2, RoundingStrategy::ToZero).max(Decimal::ONE)
}

/// Compare the live multiplier against the committed crash point.
/// An overshooting tick reports the crash point, never the raw value.
pub fn evaluate_tick(growth_base: f64, elapsed: Duration, crash_point: Decimal) -> TickOutcome {
    let live = multiplier_at(growth_base, elapsed);
    if live >= crash_point {
        TickOutcome::Crashed(crash_point)
    } else {
        TickOutcome::Rising(live)
    }
}

pub fn remaining_ms(deadline: Option<Instant>, now: Instant) -> u64 {
    deadline
        .map(|d| d.saturating_duration_since(now).as_millis() as u64)
        .unwrap_or(0)
}
