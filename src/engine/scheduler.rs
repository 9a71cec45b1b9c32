//! The round lifecycle state machine.
//!
//! `idle → announced → locked → running → busted → settling → idle|announced`
//!
//! One scheduler instance per process. The loop task is the sole owner of
//! round-wide mutable state (current id, seed, start time, bust) and never
//! runs two iterations concurrently: the running flag is claimed with a
//! compare-and-swap and the loop only re-enters itself at its own tail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::GameConfig;
use crate::engine::ledger::{WagerLedger, WagerSlot};
use crate::engine::outcome::{compute_bust, multiplier_at, round_length_ms};
use crate::engine::safety::SafetyController;
use crate::engine::timer_pool::TimerPool;
use crate::engine::types::{now_ms, PlayerId, RoundClock, RoundRecord, Seed, Wager};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::presence::Presence;
use crate::store::{PauseStore, Persistence};
use crate::wallet::WalletClient;

/// Current round as shown to a newly connected client. The bust value and
/// seed stay hidden until the round has actually busted.
#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub start: i64,
    pub bust: Option<u64>,
    pub seed_hex: Option<String>,
    pub wagers: Vec<Wager>,
}

struct RoundState {
    round_id: u64,
    start_ms: i64,
    bust: u64,
    seed: Option<Seed>,
    busted: bool,
    history: VecDeque<RoundRecord>,
}

pub struct RoundScheduler {
    game: GameConfig,
    store: Arc<dyn Persistence>,
    pause: Arc<dyn PauseStore>,
    presence: Arc<dyn Presence>,
    ledger: Arc<WagerLedger>,
    timers: Arc<TimerPool>,
    safety: Arc<SafetyController>,
    events: EventBus,
    clock: Arc<RoundClock>,
    running: AtomicBool,
    next_round_id: AtomicU64,
    state: StdMutex<RoundState>,
}

impl RoundScheduler {
    /// Wire up the engine and restore durable state (next round id, recent
    /// history). The loop itself starts via [`try_bootstrap`].
    ///
    /// [`try_bootstrap`]: RoundScheduler::try_bootstrap
    pub async fn init(
        game: GameConfig,
        store: Arc<dyn Persistence>,
        pause: Arc<dyn PauseStore>,
        presence: Arc<dyn Presence>,
        wallet: Arc<dyn WalletClient>,
        events: EventBus,
    ) -> EngineResult<Arc<Self>> {
        let clock = Arc::new(RoundClock::new());
        let timers = Arc::new(TimerPool::new());
        let ledger = Arc::new(WagerLedger::new(Arc::clone(&store), events.clone()));
        let safety = Arc::new(SafetyController::new(
            Arc::clone(&timers),
            Arc::clone(&ledger),
            Arc::clone(&store),
            wallet,
            events.clone(),
            Arc::clone(&clock),
            game.safety_single,
            game.safety_round,
        ));

        let next_round_id = store.next_round_id().await?;
        let history: VecDeque<RoundRecord> = store.recent_rounds(game.history).await?.into();

        Ok(Arc::new(Self {
            game,
            store,
            pause,
            presence,
            ledger,
            timers,
            safety,
            events,
            clock,
            running: AtomicBool::new(false),
            next_round_id: AtomicU64::new(next_round_id),
            state: StdMutex::new(RoundState {
                round_id: 0,
                start_ms: 0,
                bust: 0,
                seed: None,
                busted: false,
                history,
            }),
        }))
    }

    /// Start the round loop iff someone is connected and no loop is
    /// already running. Safe to call from every connection event.
    pub fn try_bootstrap(self: &Arc<Self>) {
        if !self.presence.is_anyone_connected() {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        debug!("bootstrapping round loop");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await });
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            match self.run_round().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(EngineError::Exhausted(round_id)) => {
                    // Fatal for round progression only: connections and
                    // settlement paths stay up.
                    error!(round_id, "out of committed seeds, no further rounds can start");
                    break;
                }
                Err(err) => {
                    error!(%err, "round loop stopped on error");
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// One full round. Returns whether the loop should go again.
    async fn run_round(&self) -> EngineResult<bool> {
        if self.pause.get().await? {
            info!("round loop paused");
            self.events.publish(EngineEvent::Paused { value: true });
            return Ok(false);
        }

        let round_id = self.next_round_id.fetch_add(1, Ordering::SeqCst);
        info!(round_id, "initiating round");

        // No timer from the previous round may fire into this one.
        self.timers.clear();

        let seed = self
            .store
            .committed_seed(round_id)
            .await?
            .ok_or(EngineError::Exhausted(round_id))?;
        debug!(round_id, seed = %hex::encode(seed), "committed seed loaded");

        let bust = compute_bust(&seed, &self.game.salt);
        let length_ms = round_length_ms(bust);
        let padding_ms = self.game.round_padding_secs * 1_000;

        let announced_at = Instant::now();
        let start_ms = now_ms() + padding_ms as i64;
        self.clock.set_start(start_ms);
        {
            let mut state = self.state.lock().expect("round state lock");
            state.round_id = round_id;
            state.start_ms = start_ms;
            state.bust = bust;
            state.seed = Some(seed);
            state.busted = false;
        }

        // Persisted before the round runs, so a crash mid-round still has
        // the committed outcome on disk.
        self.store
            .save_round(&RoundRecord {
                id: round_id,
                seed_hex: hex::encode(seed),
                bust,
                total_wagered: 0,
                total_profit: 0,
            })
            .await?;

        self.events.publish(EngineEvent::RoundAnnounced {
            round_id,
            start: start_ms,
        });
        debug!(round_id, bust = bust as f64 / 100.0, length_ms, "outcome fixed");

        // Lock-in: pending wagers join as the countdown starts. More can
        // come in during the countdown, none can back out.
        let drained = self.ledger.drain_pending_to_active().await?;
        for wager in &drained.activated {
            // An arming failure leaves one wager uncapped; it must not
            // abort the round everyone else is in.
            if let Err(err) = self
                .safety
                .arm_wager_cap(wager.player, wager.name.clone(), wager.stake, wager.target)
                .await
            {
                error!(player = %wager.name, %err, "per-wager safety arm failed");
            }
        }
        self.events.publish(EngineEvent::WagersLocked);

        if self.ledger.total_at_risk().await > 0 {
            if let Err(err) = self.safety.reset_round_cap().await {
                error!(%err, "round-wide safety arm failed");
            }
        }

        // The bust instant is fully determined at announce time; sleep
        // through the countdown and the climb in one go.
        let bust_in = Duration::from_millis(padding_ms + length_ms as u64);
        tokio::time::sleep_until(announced_at + bust_in).await;

        self.timers.clear();

        let totals = self.ledger.settle_all(round_id, bust).await?;
        self.store
            .finalize_round(round_id, totals.total_wagered, totals.total_profit)
            .await?;

        {
            let mut state = self.state.lock().expect("round state lock");
            state.busted = true;
            state.history.push_front(RoundRecord {
                id: round_id,
                seed_hex: hex::encode(seed),
                bust,
                total_wagered: totals.total_wagered,
                total_profit: totals.total_profit,
            });
            state.history.truncate(self.game.history);
        }

        self.events.publish(EngineEvent::Bust {
            bust,
            seed: hex::encode(seed),
        });
        info!(
            round_id,
            total_wagered = totals.total_wagered,
            total_profit = totals.total_profit as f64 / 100.0,
            "round ended"
        );

        // Leave the bust value on screen for a beat.
        tokio::time::sleep(Duration::from_secs(self.game.round_delay_secs)).await;

        if !self.presence.is_anyone_connected() {
            debug!("nobody connected, idling until the next client");
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether a submission right now would join the round in flight.
    /// True only during the announce-to-liftoff countdown.
    fn lock_open(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let state = self.state.lock().expect("round state lock");
        !state.busted && now_ms() < state.start_ms
    }

    /// Accept a wager from the dispatch layer. During the countdown it
    /// joins the running round directly; otherwise it queues for the next.
    pub async fn place_wager(
        &self,
        player: PlayerId,
        name: &str,
        stake: u64,
        target: u64,
    ) -> EngineResult<WagerSlot> {
        let lock_open = self.lock_open();
        let slot = self
            .ledger
            .submit(player, name, stake, target, lock_open)
            .await?;

        if slot == WagerSlot::Active {
            // The wager is already in; a failed arm is logged, not
            // surfaced as a rejection the player would misread.
            if let Err(err) = self
                .safety
                .arm_wager_cap(player, name.to_string(), stake, target)
                .await
            {
                error!(player = %name, %err, "per-wager safety arm failed");
            }
            if let Err(err) = self.safety.reset_round_cap().await {
                error!(%err, "round-wide safety arm failed");
            }
        }
        Ok(slot)
    }

    /// Player-initiated exit. A still-pending wager is retracted outright
    /// (`None`); an active wager cashes out at the live multiplier.
    pub async fn pull_wager(&self, player: PlayerId) -> EngineResult<Option<u64>> {
        if self.ledger.retract_pending(player).await.is_ok() {
            return Ok(None);
        }
        let live = multiplier_at(self.clock.elapsed_ms());
        let cashout = self.ledger.cash_out(player, live, None).await?;

        // The exit changed what's at risk; the round-wide cap moves with it.
        if let Err(err) = self.safety.reset_round_cap().await {
            error!(%err, "round-wide safety re-arm failed");
        }
        Ok(Some(cashout))
    }

    pub async fn is_playing(&self, player: PlayerId) -> Option<WagerSlot> {
        self.ledger.is_playing(player).await
    }

    /// Whether a submission from this player would currently be accepted,
    /// taking each ledger lock in turn.
    pub async fn can_join(&self, player: PlayerId) -> bool {
        self.ledger.is_playing(player).await.is_none()
    }

    /// Halt the loop before the next round starts. Durable across
    /// restarts; no round id is consumed while paused.
    pub async fn request_pause(&self) -> EngineResult<()> {
        self.pause.set(true).await?;
        Ok(())
    }

    /// Clear the pause flag and resume rounds. Returns whether anything
    /// was actually paused.
    pub async fn resume(self: &Arc<Self>) -> EngineResult<bool> {
        if !self.pause.get().await? {
            return Ok(false);
        }
        self.pause.set(false).await?;
        self.events.publish(EngineEvent::Paused { value: false });
        self.try_bootstrap();
        Ok(true)
    }

    pub async fn snapshot(&self) -> RoundSnapshot {
        let (round_id, start, bust, seed_hex) = {
            let state = self.state.lock().expect("round state lock");
            (
                state.round_id,
                state.start_ms,
                state.busted.then_some(state.bust),
                if state.busted {
                    state.seed.map(hex::encode)
                } else {
                    None
                },
            )
        };
        RoundSnapshot {
            round_id,
            start,
            bust,
            seed_hex,
            wagers: self.ledger.active_snapshot().await,
        }
    }

    /// Settled rounds, newest first, bounded by the configured history.
    pub fn history(&self) -> Vec<RoundRecord> {
        self.state
            .lock()
            .expect("round state lock")
            .history
            .iter()
            .cloned()
            .collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn ledger(&self) -> &Arc<WagerLedger> {
        &self.ledger
    }
}
