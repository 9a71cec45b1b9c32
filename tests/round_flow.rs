//! End-to-end round flow against the public engine surface.

use std::sync::Arc;
use std::time::Duration;

use bustline::config::GameConfig;
use bustline::engine::outcome::compute_bust;
use bustline::engine::{RoundScheduler, WagerSlot};
use bustline::events::{EngineEvent, EventBus};
use bustline::presence::{ConnectionRegistry, Presence};
use bustline::store::{InMemoryStore, MemoryPauseStore, Persistence};
use bustline::wallet::OfflineWallet;

const SALT: &str = "integration-salt";

struct Rig {
    scheduler: Arc<RoundScheduler>,
    store: Arc<InMemoryStore>,
    registry: Arc<ConnectionRegistry>,
    events: EventBus,
}

async fn rig(seeds: usize, history: usize) -> Rig {
    let store = Arc::new(InMemoryStore::with_seed_chain_from(seeds, [9u8; 32]));
    let registry = Arc::new(ConnectionRegistry::new());
    let events = EventBus::new(4096);
    let game = GameConfig {
        salt: SALT.to_string(),
        round_delay_secs: 1,
        round_padding_secs: 2,
        history,
        safety_single: 1.0,
        safety_round: 1.0,
    };

    let scheduler = RoundScheduler::init(
        game,
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::new(MemoryPauseStore::new()),
        Arc::clone(&registry) as Arc<dyn Presence>,
        Arc::new(OfflineWallet::new(10_000_000)),
        events.clone(),
    )
    .await
    .expect("engine init");

    Rig {
        scheduler,
        store,
        registry,
        events,
    }
}

async fn await_event(
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    mut matcher: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        let event = rx.recv().await.expect("event stream alive");
        if matcher(&event) {
            return event;
        }
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn pending_wagers_ride_a_full_round() {
    let rig = rig(4, 5).await;
    let alice = rig.store.create_player("alice", 10_000);
    let bob = rig.store.create_player("bob", 10_000);
    let mut rx = rig.events.subscribe();

    let slot = rig
        .scheduler
        .place_wager(alice, "alice", 5, 150)
        .await
        .unwrap();
    assert_eq!(slot, WagerSlot::Pending);
    rig.scheduler.place_wager(bob, "bob", 10, 1_000).await.unwrap();

    rig.registry.client_connected();
    rig.scheduler.try_bootstrap();

    let bust = match await_event(&mut rx, |e| matches!(e, EngineEvent::Bust { .. })).await {
        EngineEvent::Bust { bust, .. } => bust,
        _ => unreachable!(),
    };

    // the outcome is recomputable from the committed seed
    let seed = rig.store.committed_seed(0).await.unwrap().unwrap();
    assert_eq!(compute_bust(&seed, SALT), bust);

    let alice_profit = if 150 <= bust { 5 * 150 } else { 0 };
    let bob_profit = if 1_000 <= bust { 10 * 1_000 } else { 0 };
    assert_eq!(
        rig.store.balance(alice).await.unwrap(),
        10_000 - 500 + alice_profit
    );
    assert_eq!(
        rig.store.balance(bob).await.unwrap(),
        10_000 - 1_000 + bob_profit
    );

    // both wagers settled exactly once, with sequenced history rows
    assert!(rig.scheduler.is_playing(alice).await.is_none());
    assert_eq!(rig.store.history(alice).len(), 1);
    assert_eq!(rig.store.history(alice)[0].seq, 1);
    assert_eq!(rig.store.history(bob)[0].bust, bust);

    // totals were finalized on the persisted round record
    let rounds = rig.store.recent_rounds(10).await.unwrap();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].total_wagered, 15);
    assert_eq!(rounds[0].total_profit, alice_profit + bob_profit);

    let history = rig.scheduler.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].bust, bust);
}

#[tokio::test(start_paused = true)]
async fn rounds_advance_and_history_stays_bounded() {
    let rig = rig(10, 2).await;
    let mut rx = rig.events.subscribe();

    rig.registry.client_connected();
    rig.scheduler.try_bootstrap();

    for _ in 0..3 {
        await_event(&mut rx, |e| matches!(e, EngineEvent::Bust { .. })).await;
    }

    let history = rig.scheduler.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, 2);
    assert_eq!(history[1].id, 1);

    assert_eq!(rig.store.recent_rounds(10).await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn seed_exhaustion_halts_rounds_without_crashing() {
    let rig = rig(1, 5).await;
    let mut rx = rig.events.subscribe();

    rig.registry.client_connected();
    rig.scheduler.try_bootstrap();

    await_event(&mut rx, |e| matches!(e, EngineEvent::Bust { .. })).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    let later = drain(&mut rx);
    assert!(!later
        .iter()
        .any(|e| matches!(e, EngineEvent::RoundAnnounced { round_id: 1, .. })));

    // the engine surface stays alive for settled players
    let carol = rig.store.create_player("carol", 1_000);
    assert_eq!(
        rig.scheduler.place_wager(carol, "carol", 1, 200).await.unwrap(),
        WagerSlot::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn empty_room_idles_until_someone_returns() {
    let rig = rig(10, 5).await;
    let mut rx = rig.events.subscribe();

    rig.registry.client_connected();
    rig.scheduler.try_bootstrap();

    await_event(&mut rx, |e| matches!(e, EngineEvent::Bust { .. })).await;
    rig.registry.client_disconnected();

    tokio::time::sleep(Duration::from_secs(60)).await;
    let quiet = drain(&mut rx);
    assert!(!quiet
        .iter()
        .any(|e| matches!(e, EngineEvent::RoundAnnounced { round_id: 1, .. })));

    rig.registry.client_connected();
    rig.scheduler.try_bootstrap();
    await_event(
        &mut rx,
        |e| matches!(e, EngineEvent::RoundAnnounced { round_id: 1, .. }),
    )
    .await;
}
