//! Outbound engine events.
//!
//! The engine publishes a closed vocabulary of events to whoever is
//! listening (socket layer, metrics, tests). Delivery is fire-and-forget
//! broadcast: publishers never block, and publishing with no subscribers
//! is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::types::PlayerId;

/// Where a player's wager currently lives, as seen by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayingState {
    Pending,
    Active,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A round has been announced; the multiplier starts climbing at `start`
    /// (unix epoch milliseconds).
    RoundAnnounced { round_id: u64, start: i64 },

    /// Pending wagers have been drained into the active set.
    WagersLocked,

    PlayerJoined { name: String, stake: u64 },

    /// Fixed-point hundredths: 150 == 1.50x.
    PlayerCashedOut { name: String, cashout: u64 },

    /// A wager was force-closed at its individual bankroll safety cap.
    SafetyTriggered { name: String },

    /// The round stopped. `seed` is the revealed hex seed so anyone can
    /// recompute the bust.
    Bust { bust: u64, seed: String },

    PlayingChanged { player: PlayerId, state: PlayingState },

    BalanceChanged { player: PlayerId },

    Paused { value: bool },
}

/// Broadcast fan-out for [`EngineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // No receivers is fine; slow receivers lag and drop, never block us.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::Paused { value: true });

        match rx.recv().await.expect("event") {
            EngineEvent::Paused { value } => assert!(value),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::WagersLocked);
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_value(EngineEvent::Bust {
            bust: 213,
            seed: "ab".into(),
        })
        .expect("serialize");

        assert_eq!(json["type"], "bust");
        assert_eq!(json["bust"], 213);
    }
}
