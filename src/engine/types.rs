//! Core round-engine data types.
//!
//! All multiplier values are fixed-point hundredths (150 == 1.50x).
//! Player balances are stored in fixed-point hundredths of the base
//! currency unit; wager stakes are raw units. Locking in a wager debits
//! `100 * stake`; a winning wager credits `stake * cashout`.

use std::sync::atomic::{AtomicI64, Ordering};

pub type PlayerId = u64;

/// A committed 32-byte seed from the precomputed chain.
pub type Seed = [u8; 32];

/// 1.00x in fixed-point hundredths.
pub const MULTIPLIER_ONE: u64 = 100;

/// The lowest accepted target cashout, strictly above 1.00x.
pub const MIN_TARGET: u64 = 101;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Announced,
    Running,
    Busted,
}

/// A single player's position in a round.
#[derive(Debug, Clone)]
pub struct Wager {
    pub player: PlayerId,
    pub name: String,
    /// Raw currency units, not fixed-point.
    pub stake: u64,
    /// Fixed-point hundredths, always >= [`MIN_TARGET`].
    pub target: u64,
    /// Effective cashout. Starts equal to `target` and only ever moves
    /// down (early exit, safety cap).
    pub cashout: u64,
    pub exited: bool,
}

impl Wager {
    pub fn new(player: PlayerId, name: String, stake: u64, target: u64) -> Self {
        Self {
            player,
            name,
            stake,
            target,
            cashout: target,
            exited: false,
        }
    }

    /// Profit credited at settlement, in balance units (fixed-point).
    /// A wager whose cashout sits at or below the bust wins; the stake
    /// itself was already debited at lock-in.
    pub fn payout(&self, bust: u64) -> u64 {
        if self.cashout <= bust {
            self.stake * self.cashout
        } else {
            0
        }
    }
}

/// A settled round as kept in the bounded history ring and persisted.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub id: u64,
    pub seed_hex: String,
    pub bust: u64,
    pub total_wagered: u64,
    pub total_profit: u64,
}

/// Wall-clock anchor for the round in flight.
///
/// Written only by the scheduler loop at announce time; read by anything
/// that needs the elapsed time since liftoff (live multiplier, safety
/// timer offsets). Negative elapsed means the countdown is still running.
#[derive(Debug, Default)]
pub struct RoundClock {
    start_ms: AtomicI64,
}

impl RoundClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start(&self, epoch_ms: i64) {
        self.start_ms.store(epoch_ms, Ordering::SeqCst);
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms.load(Ordering::SeqCst)
    }

    pub fn elapsed_ms(&self) -> f64 {
        (now_ms() - self.start_ms()) as f64
    }
}

/// Current wall time as unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_is_stake_times_cashout_on_win() {
        let w = Wager::new(1, "alice".into(), 5, 150);
        assert_eq!(w.payout(250), 750);
    }

    #[test]
    fn payout_is_zero_past_bust() {
        let w = Wager::new(1, "bob".into(), 10, 300);
        assert_eq!(w.payout(250), 0);
    }

    #[test]
    fn payout_wins_exactly_at_bust() {
        let w = Wager::new(1, "carol".into(), 4, 250);
        assert_eq!(w.payout(250), 1000);
    }

    #[test]
    fn round_clock_reports_negative_elapsed_before_liftoff() {
        let clock = RoundClock::new();
        clock.set_start(now_ms() + 5_000);
        assert!(clock.elapsed_ms() < 0.0);
    }
}
