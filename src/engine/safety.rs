//! Bankroll-derived safety caps and forced cashouts.
//!
//! The house can only pay what the bankroll holds. Every active wager gets
//! a per-player timer at `min(target, individual cap)`; the round as a
//! whole gets one timer at the round-wide cap. Whichever fires first wins.
//! Caps are re-derived whenever the active set's composition changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::engine::ledger::WagerLedger;
use crate::engine::outcome::round_length_ms;
use crate::engine::timer_pool::{TimerKey, TimerPool};
use crate::engine::types::{PlayerId, RoundClock, MULTIPLIER_ONE};
use crate::errors::EngineResult;
use crate::events::{EngineEvent, EventBus};
use crate::store::Persistence;
use crate::wallet::{unallocated_balance, WalletClient};

/// Cap for a single wager: the multiplier at which its payout would eat
/// the configured share of the bankroll on top of the returned stake.
pub fn individual_cap(bankroll: u64, max_percent: f64, stake: u64) -> u64 {
    let headroom = bankroll as f64 * max_percent + (MULTIPLIER_ONE * stake) as f64;
    (headroom / stake as f64).round() as u64
}

/// Cap for the whole round, over the cumulative stake still riding, with
/// profit already committed to exited wagers taken off the bankroll.
/// `None` when nothing is at risk.
pub fn round_wide_cap(
    bankroll: u64,
    max_percent: f64,
    total_stake: u64,
    profit_committed: u64,
) -> Option<u64> {
    if total_stake == 0 {
        return None;
    }
    let effective = bankroll.saturating_sub(profit_committed);
    Some(individual_cap(effective, max_percent, total_stake))
}

pub struct SafetyController {
    timers: Arc<TimerPool>,
    ledger: Arc<WagerLedger>,
    store: Arc<dyn Persistence>,
    wallet: Arc<dyn WalletClient>,
    events: EventBus,
    clock: Arc<RoundClock>,
    single_percent: f64,
    round_percent: f64,
    /// Round-cap recomputation is serialized so a recomputation racing a
    /// pending replacement can never leave a stale cap armed.
    recompute: Mutex<()>,
}

impl SafetyController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timers: Arc<TimerPool>,
        ledger: Arc<WagerLedger>,
        store: Arc<dyn Persistence>,
        wallet: Arc<dyn WalletClient>,
        events: EventBus,
        clock: Arc<RoundClock>,
        single_percent: f64,
        round_percent: f64,
    ) -> Self {
        Self {
            timers,
            ledger,
            store,
            wallet,
            events,
            clock,
            single_percent,
            round_percent,
            recompute: Mutex::new(()),
        }
    }

    async fn bankroll(&self) -> EngineResult<u64> {
        Ok(unallocated_balance(self.store.as_ref(), self.wallet.as_ref()).await?)
    }

    /// Time left until the live multiplier reaches `multiplier`.
    fn delay_until(&self, multiplier: u64) -> Duration {
        let remaining = round_length_ms(multiplier) - self.clock.elapsed_ms();
        Duration::from_millis(remaining.max(0.0) as u64)
    }

    /// Arm the auto-cashout timer for one newly activated wager, at the
    /// player's target or the individual safety cap, whichever is lower.
    /// Only a cap-limited exit raises the safety alert.
    pub async fn arm_wager_cap(
        self: &Arc<Self>,
        player: PlayerId,
        name: String,
        stake: u64,
        target: u64,
    ) -> EngineResult<()> {
        let cap = individual_cap(self.bankroll().await?, self.single_percent, stake);
        let effective = target.min(cap);

        let this = Arc::clone(self);
        self.timers
            .arm(TimerKey::Player(player), self.delay_until(effective), move || {
                let this = Arc::clone(&this);
                let name = name.clone();
                async move {
                    if this
                        .ledger
                        .cash_out(player, effective, Some(effective))
                        .await
                        .is_ok()
                        && effective == cap
                    {
                        this.events.publish(EngineEvent::SafetyTriggered { name });
                    }
                }
            });
        Ok(())
    }

    /// Re-derive the round-wide cap from the current active set and re-arm
    /// the round timer at the implied offset.
    pub fn reset_round_cap<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = EngineResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let _serialized = self.recompute.lock().await;

            let total_stake = self.ledger.total_at_risk().await;
            let profit = self.ledger.profit_committed().await;
            let bankroll = self.bankroll().await?;
            let Some(cap) = round_wide_cap(bankroll, self.round_percent, total_stake, profit)
            else {
                return Ok(());
            };

            let this = Arc::clone(self);
            self.timers
                .arm(TimerKey::Round, self.delay_until(cap), move || {
                    let this = Arc::clone(&this);
                    async move { this.round_cap_fired(cap).await }
                });
            Ok(())
        })
    }

    async fn round_cap_fired(self: &Arc<Self>, armed_cap: u64) {
        // Players may have exited while the timer was pending; re-derive
        // before enforcing.
        let total_stake = self.ledger.total_at_risk().await;
        let profit = self.ledger.profit_committed().await;
        let bankroll = match self.bankroll().await {
            Ok(bankroll) => bankroll,
            Err(err) => {
                warn!(%err, "bankroll read failed during round safety enforcement");
                return;
            }
        };

        match round_wide_cap(bankroll, self.round_percent, total_stake, profit) {
            Some(fresh) if fresh != armed_cap => {
                if let Err(err) = self.reset_round_cap().await {
                    warn!(%err, "round safety re-arm failed");
                }
            }
            Some(_) => {
                for (player, name) in self.ledger.riders().await {
                    // A round-wide enforcement is an ordinary forced
                    // cashout; the safety alert is reserved for the
                    // per-wager cap.
                    if let Err(err) = self
                        .ledger
                        .cash_out(player, armed_cap, Some(armed_cap))
                        .await
                    {
                        warn!(player = %name, %err, "round safety cashout skipped");
                    }
                }
            }
            None => {}
        }
    }
}
