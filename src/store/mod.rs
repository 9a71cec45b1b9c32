//! Persistence and pause-state collaborator seams.
//!
//! The engine never talks to a database directly; it goes through
//! [`Persistence`], which any backend can implement. The batch operations
//! (`drain_stakes`, `apply_settlement`) are the transaction boundaries:
//! implementations must apply each batch atomically so a crash mid-drain
//! or mid-settlement cannot half-debit a round.

pub mod memory;

use async_trait::async_trait;

use crate::engine::types::{PlayerId, RoundRecord, Seed};
use crate::errors::StoreError;

pub use memory::{InMemoryStore, MemoryPauseStore};

/// One wager's outcome as handed to settlement persistence.
#[derive(Debug, Clone)]
pub struct SettlementEntry {
    pub player: PlayerId,
    /// Raw currency units.
    pub stake: u64,
    /// The cashout reached, `None` for a losing wager.
    pub cashout: Option<u64>,
    /// Balance units credited; zero for a loss.
    pub profit: u64,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Current balance in fixed-point hundredths.
    async fn balance(&self, player: PlayerId) -> Result<u64, StoreError>;

    async fn credit(&self, player: PlayerId, amount: u64) -> Result<(), StoreError>;

    /// Debit `amount` iff the balance covers it; returns whether the debit
    /// happened. The check and the debit are one atomic step.
    async fn debit_if_sufficient(&self, player: PlayerId, amount: u64) -> Result<bool, StoreError>;

    /// Sum of all player balances, the "allocated" share of the custodial
    /// wallet.
    async fn total_allocated(&self) -> Result<u64, StoreError>;

    /// Lock-in drain: for each (player, amount), re-check the balance still
    /// covers the stake and debit it. The whole batch applies in one
    /// transaction; the returned flags mirror the input order.
    async fn drain_stakes(&self, debits: &[(PlayerId, u64)]) -> Result<Vec<bool>, StoreError>;

    /// Credit profits and append one sequenced history row per entry. The
    /// per-player sequence number is assigned under the same lock that
    /// performs the settlement.
    async fn apply_settlement(
        &self,
        round_id: u64,
        bust: u64,
        entries: &[SettlementEntry],
    ) -> Result<(), StoreError>;

    /// The committed seed for a round id, `None` once the chain runs dry.
    async fn committed_seed(&self, round_id: u64) -> Result<Option<Seed>, StoreError>;

    /// One past the highest executed round id.
    async fn next_round_id(&self) -> Result<u64, StoreError>;

    /// Persist the round record before the round runs, so a crash
    /// mid-round still has the committed outcome on disk.
    async fn save_round(&self, record: &RoundRecord) -> Result<(), StoreError>;

    async fn finalize_round(
        &self,
        round_id: u64,
        total_wagered: u64,
        total_profit: u64,
    ) -> Result<(), StoreError>;

    /// Most recent executed rounds, newest first.
    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>, StoreError>;
}

/// Durable single-boolean pause flag, surviving process restarts.
#[async_trait]
pub trait PauseStore: Send + Sync {
    async fn get(&self) -> Result<bool, StoreError>;
    async fn set(&self, value: bool) -> Result<(), StoreError>;
}
