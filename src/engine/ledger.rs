//! The wager ledger: pending and active collections and their
//! concurrency discipline.
//!
//! Two independently locked collections. `pending` holds wagers queued for
//! the next round (no money has moved); `active` holds wagers locked into
//! the round in flight (stake debited). Lock order is always pending
//! before active: `drain_pending_to_active` takes both, so any caller
//! taking them in the reverse order could deadlock against it.

use std::mem;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::types::{PlayerId, Wager, MIN_TARGET, MULTIPLIER_ONE};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus, PlayingState};
use crate::store::{Persistence, SettlementEntry};

/// Which collection currently holds a player's wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WagerSlot {
    Pending,
    Active,
}

/// A wager that survived the lock-in drain, reported back so the caller
/// can arm its safety timer.
#[derive(Debug, Clone)]
pub struct Activated {
    pub player: PlayerId,
    pub name: String,
    pub stake: u64,
    pub target: u64,
}

#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub activated: Vec<Activated>,
    /// Players whose balance no longer covered the stake at lock-in.
    /// Soft-admission: dropped silently, reported for presence updates.
    pub dropped: Vec<PlayerId>,
}

#[derive(Debug, Clone, Copy)]
pub struct SettleTotals {
    /// Sum of every settled stake, raw units.
    pub total_wagered: u64,
    /// Sum of every credited profit, balance units.
    pub total_profit: u64,
}

pub struct WagerLedger {
    pending: Mutex<Vec<Wager>>,
    active: Mutex<Vec<Wager>>,
    store: Arc<dyn Persistence>,
    events: EventBus,
}

impl WagerLedger {
    pub fn new(store: Arc<dyn Persistence>, events: EventBus) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
            store,
            events,
        }
    }

    /// Accept a wager. During the lock-in window (`lock_open`) it joins the
    /// running round directly and the stake is debited on the spot;
    /// otherwise it queues for the next round with no debit.
    pub async fn submit(
        &self,
        player: PlayerId,
        name: &str,
        stake: u64,
        target: u64,
        lock_open: bool,
    ) -> EngineResult<WagerSlot> {
        if stake == 0 {
            return Err(EngineError::InvalidStake(stake));
        }
        if target < MIN_TARGET {
            return Err(EngineError::InvalidCashout(target));
        }

        // One wager per player per round cycle, across both collections.
        // Locks are taken pending-first to stay ordered with the drain.
        let pending = self.pending.lock().await;
        if pending.iter().any(|w| w.player == player) {
            return Err(EngineError::AlreadyEngaged);
        }

        if lock_open {
            // The pending guard stays held across the insert, so a racing
            // queued submission can't land the same player in both
            // collections.
            let mut active = self.active.lock().await;
            if active.iter().any(|w| w.player == player) {
                return Err(EngineError::AlreadyEngaged);
            }

            // Debit under the active-set lock so the wager is never
            // visible without its stake collected.
            if !self
                .store
                .debit_if_sufficient(player, MULTIPLIER_ONE * stake)
                .await?
            {
                return Err(EngineError::InsufficientFunds);
            }
            active.push(Wager::new(player, name.to_string(), stake, target));

            self.events.publish(EngineEvent::PlayerJoined {
                name: name.to_string(),
                stake,
            });
            self.events.publish(EngineEvent::PlayingChanged {
                player,
                state: PlayingState::Active,
            });
            Ok(WagerSlot::Active)
        } else {
            {
                let active = self.active.lock().await;
                if active.iter().any(|w| w.player == player) {
                    return Err(EngineError::AlreadyEngaged);
                }
            }

            // No debit yet, but reject wagers the balance can't cover now;
            // the drain re-checks at lock-in regardless.
            if self.store.balance(player).await? < MULTIPLIER_ONE * stake {
                return Err(EngineError::InsufficientFunds);
            }

            let mut pending = pending;
            pending.push(Wager::new(player, name.to_string(), stake, target));
            self.events.publish(EngineEvent::PlayingChanged {
                player,
                state: PlayingState::Pending,
            });
            Ok(WagerSlot::Pending)
        }
    }

    /// Cash a player out of the active set.
    ///
    /// `enforced` is supplied by the safety controller when force-closing;
    /// otherwise `live_multiplier` (from elapsed time) applies. The
    /// effective cashout never exceeds the wager's current value and never
    /// drops below 1.00x, so backing out during the countdown is a refund.
    pub async fn cash_out(
        &self,
        player: PlayerId,
        live_multiplier: u64,
        enforced: Option<u64>,
    ) -> EngineResult<u64> {
        let mut active = self.active.lock().await;
        let wager = active
            .iter_mut()
            .find(|w| w.player == player)
            .ok_or(EngineError::NotEngaged)?;
        if wager.exited {
            return Err(EngineError::NotEngaged);
        }

        let position = enforced.unwrap_or(live_multiplier);
        wager.cashout = wager.cashout.min(position.max(MULTIPLIER_ONE));
        wager.exited = true;

        let (name, cashout) = (wager.name.clone(), wager.cashout);
        debug!(player = %name, cashout = cashout as f64 / 100.0, "cashed out");

        self.events.publish(EngineEvent::PlayerCashedOut {
            name,
            cashout,
        });
        self.events.publish(EngineEvent::PlayingChanged {
            player,
            state: PlayingState::Idle,
        });
        Ok(cashout)
    }

    /// Withdraw a wager that is still queued for the next round. Nothing
    /// was debited, so nothing needs reversing.
    pub async fn retract_pending(&self, player: PlayerId) -> EngineResult<()> {
        let mut pending = self.pending.lock().await;
        let idx = pending
            .iter()
            .position(|w| w.player == player)
            .ok_or(EngineError::NotEngaged)?;
        pending.remove(idx);

        self.events.publish(EngineEvent::PlayingChanged {
            player,
            state: PlayingState::Idle,
        });
        Ok(())
    }

    /// Move every pending wager into the active set at lock-in, re-checking
    /// each balance and debiting the stake through one store transaction.
    /// A wager whose balance moved underneath it is dropped silently.
    pub async fn drain_pending_to_active(&self) -> EngineResult<DrainOutcome> {
        let mut pending = self.pending.lock().await;
        let mut active = self.active.lock().await;

        let wagers = mem::take(&mut *pending);
        if wagers.is_empty() {
            return Ok(DrainOutcome::default());
        }

        let debits: Vec<(PlayerId, u64)> = wagers
            .iter()
            .map(|w| (w.player, MULTIPLIER_ONE * w.stake))
            .collect();
        let applied = self.store.drain_stakes(&debits).await?;

        let mut outcome = DrainOutcome::default();
        for (wager, debited) in wagers.into_iter().zip(applied) {
            if !debited {
                warn!(player = %wager.name, stake = wager.stake, "balance moved before lock-in, wager dropped");
                self.events.publish(EngineEvent::PlayingChanged {
                    player: wager.player,
                    state: PlayingState::Idle,
                });
                outcome.dropped.push(wager.player);
                continue;
            }

            self.events.publish(EngineEvent::PlayerJoined {
                name: wager.name.clone(),
                stake: wager.stake,
            });
            self.events.publish(EngineEvent::PlayingChanged {
                player: wager.player,
                state: PlayingState::Active,
            });
            outcome.activated.push(Activated {
                player: wager.player,
                name: wager.name.clone(),
                stake: wager.stake,
                target: wager.target,
            });
            active.push(wager);
        }

        Ok(outcome)
    }

    /// Settle every active wager against the bust value, crediting winners
    /// and appending history in one store transaction. The active set is
    /// emptied as part of this call, which is what makes double settlement
    /// structurally impossible.
    pub async fn settle_all(&self, round_id: u64, bust: u64) -> EngineResult<SettleTotals> {
        let mut active = self.active.lock().await;
        let wagers = mem::take(&mut *active);

        let mut entries = Vec::with_capacity(wagers.len());
        let mut total_wagered = 0u64;
        let mut total_profit = 0u64;
        for wager in &wagers {
            let profit = wager.payout(bust);
            total_wagered += wager.stake;
            total_profit += profit;
            entries.push(SettlementEntry {
                player: wager.player,
                stake: wager.stake,
                cashout: (profit > 0).then_some(wager.cashout),
                profit,
            });
        }

        self.store.apply_settlement(round_id, bust, &entries).await?;

        for wager in &wagers {
            // Riding exactly into the bust counts as a win, and the
            // cash-out is announced at the moment it happens.
            if wager.cashout == bust && !wager.exited {
                self.events.publish(EngineEvent::PlayerCashedOut {
                    name: wager.name.clone(),
                    cashout: wager.cashout,
                });
            }
            if !wager.exited {
                self.events.publish(EngineEvent::PlayingChanged {
                    player: wager.player,
                    state: PlayingState::Idle,
                });
            }
            if wager.payout(bust) > 0 {
                self.events.publish(EngineEvent::BalanceChanged {
                    player: wager.player,
                });
            }
        }

        Ok(SettleTotals {
            total_wagered,
            total_profit,
        })
    }

    pub async fn is_playing(&self, player: PlayerId) -> Option<WagerSlot> {
        if self.contains_pending(player).await {
            return Some(WagerSlot::Pending);
        }
        if self.contains_active(player).await {
            return Some(WagerSlot::Active);
        }
        None
    }

    pub async fn contains_pending(&self, player: PlayerId) -> bool {
        self.pending.lock().await.iter().any(|w| w.player == player)
    }

    pub async fn contains_active(&self, player: PlayerId) -> bool {
        self.active.lock().await.iter().any(|w| w.player == player)
    }

    /// Cumulative stake of wagers still riding (raw units).
    pub async fn total_at_risk(&self) -> u64 {
        self.active
            .lock()
            .await
            .iter()
            .filter(|w| !w.exited)
            .map(|w| w.stake)
            .sum()
    }

    /// Profit already committed to exited wagers this round (balance units).
    pub async fn profit_committed(&self) -> u64 {
        self.active
            .lock()
            .await
            .iter()
            .filter(|w| w.exited)
            .map(|w| w.stake * (w.cashout - MULTIPLIER_ONE))
            .sum()
    }

    /// Players still riding, for round-wide forced cashouts.
    pub async fn riders(&self) -> Vec<(PlayerId, String)> {
        self.active
            .lock()
            .await
            .iter()
            .filter(|w| !w.exited)
            .map(|w| (w.player, w.name.clone()))
            .collect()
    }

    /// Snapshot of the active set for state queries.
    pub async fn active_snapshot(&self) -> Vec<Wager> {
        self.active.lock().await.clone()
    }
}
