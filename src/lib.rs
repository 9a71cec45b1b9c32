//! Bustline - continuous crash-game round engine.
//!
//! A multiplier climbs from 1.00x and stops at a value fixed in advance by
//! a provably-fair draw; players wager before liftoff and must cash out
//! before the bust. This crate is the round engine: lifecycle state
//! machine, outcome math, auto-cashout timers, the wager ledger and the
//! bankroll safety caps. Transport, auth and the wallet protocol live
//! behind the collaborator traits in [`store`], [`presence`] and
//! [`wallet`].

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod presence;
pub mod store;
pub mod txqueue;
pub mod wallet;

pub use engine::{RoundScheduler, RoundSnapshot, WagerSlot};
pub use errors::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
