//! The round engine: outcome math, timers, the wager ledger, safety caps
//! and the scheduler that drives them round after round.

pub mod ledger;
pub mod outcome;
pub mod safety;
pub mod scheduler;
pub mod timer_pool;
pub mod types;

pub use ledger::{WagerLedger, WagerSlot};
pub use safety::SafetyController;
pub use scheduler::{RoundScheduler, RoundSnapshot};
pub use timer_pool::{TimerKey, TimerPool};
pub use types::{PlayerId, RoundRecord, Seed, Wager};
