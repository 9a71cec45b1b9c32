//! In-memory persistence backend.
//!
//! Backs the test suite and the standalone demo binary. One mutex guards
//! the whole dataset, which makes every batch operation trivially atomic,
//! the same guarantee a SQL backend provides with transactions.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::engine::types::{PlayerId, RoundRecord, Seed};
use crate::errors::StoreError;
use crate::store::{PauseStore, Persistence, SettlementEntry};

/// One row of a player's wager history.
#[derive(Debug, Clone)]
pub struct BetRow {
    /// Per-player monotonically increasing sequence number.
    pub seq: u64,
    pub round_id: u64,
    pub stake: u64,
    /// `None` for a losing wager.
    pub cashout: Option<u64>,
    pub bust: u64,
    pub new_balance: u64,
}

#[derive(Debug, Default)]
struct Account {
    name: String,
    balance: u64,
    history: Vec<BetRow>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<PlayerId, Account>,
    next_player: PlayerId,
    seeds: Vec<Seed>,
    rounds: BTreeMap<u64, RoundRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a committed seed chain of `len` seeds from a random terminal
    /// value, where `seed[i] = sha256(seed[i+1])`. Rounds are played in
    /// index order, so each revealed seed lets anyone verify the whole
    /// remaining commitment.
    pub fn with_seed_chain(len: usize) -> Self {
        let mut terminal = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut terminal);
        Self::with_seed_chain_from(len, terminal)
    }

    pub fn with_seed_chain_from(len: usize, terminal: Seed) -> Self {
        let store = Self::new();
        let mut chain = Vec::with_capacity(len);
        let mut current = terminal;
        for _ in 0..len {
            chain.push(current);
            let digest = Sha256::digest(current);
            current.copy_from_slice(&digest);
        }
        chain.reverse();
        store.inner.lock().unwrap().seeds = chain;
        store
    }

    /// Load a chain file of newline-separated hex seeds, one per round id
    /// in play order.
    pub fn from_chain_file(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("chain file {}: {}", path.display(), e)))?;

        let mut seeds = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let bytes = hex::decode(line.trim())
                .map_err(|e| StoreError::Backend(format!("bad chain line: {}", e)))?;
            let seed: Seed = bytes
                .try_into()
                .map_err(|_| StoreError::Backend("chain seeds must be 32 bytes".into()))?;
            seeds.push(seed);
        }

        let store = Self::new();
        store.inner.lock().unwrap().seeds = seeds;
        Ok(store)
    }

    /// Register a player with a starting balance (fixed-point hundredths).
    pub fn create_player(&self, name: &str, balance: u64) -> PlayerId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_player;
        inner.next_player += 1;
        inner.accounts.insert(
            id,
            Account {
                name: name.to_string(),
                balance,
                history: Vec::new(),
            },
        );
        id
    }

    /// Test/inspection helper: a player's full history, oldest first.
    pub fn history(&self, player: PlayerId) -> Vec<BetRow> {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .get(&player)
            .map(|a| a.history.clone())
            .unwrap_or_default()
    }

    pub fn seed_count(&self) -> usize {
        self.inner.lock().unwrap().seeds.len()
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn balance(&self, player: PlayerId) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&player)
            .map(|a| a.balance)
            .ok_or(StoreError::UnknownPlayer(player))
    }

    async fn credit(&self, player: PlayerId, amount: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .accounts
            .get_mut(&player)
            .ok_or(StoreError::UnknownPlayer(player))?;
        account.balance += amount;
        Ok(())
    }

    async fn debit_if_sufficient(&self, player: PlayerId, amount: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .accounts
            .get_mut(&player)
            .ok_or(StoreError::UnknownPlayer(player))?;
        if account.balance < amount {
            return Ok(false);
        }
        account.balance -= amount;
        Ok(true)
    }

    async fn total_allocated(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.values().map(|a| a.balance).sum())
    }

    async fn drain_stakes(&self, debits: &[(PlayerId, u64)]) -> Result<Vec<bool>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut applied = Vec::with_capacity(debits.len());
        for &(player, amount) in debits {
            let ok = match inner.accounts.get_mut(&player) {
                Some(account) if account.balance >= amount => {
                    account.balance -= amount;
                    true
                }
                _ => false,
            };
            applied.push(ok);
        }
        Ok(applied)
    }

    async fn apply_settlement(
        &self,
        round_id: u64,
        bust: u64,
        entries: &[SettlementEntry],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for entry in entries {
            let account = inner
                .accounts
                .get_mut(&entry.player)
                .ok_or(StoreError::UnknownPlayer(entry.player))?;
            account.balance += entry.profit;
            let seq = account.history.last().map(|r| r.seq).unwrap_or(0) + 1;
            account.history.push(BetRow {
                seq,
                round_id,
                stake: entry.stake,
                cashout: entry.cashout,
                bust,
                new_balance: account.balance,
            });
        }
        Ok(())
    }

    async fn committed_seed(&self, round_id: u64) -> Result<Option<Seed>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.seeds.get(round_id as usize).copied())
    }

    async fn next_round_id(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rounds.keys().next_back().map(|id| id + 1).unwrap_or(0))
    }

    async fn save_round(&self, record: &RoundRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.rounds.insert(record.id, record.clone());
        Ok(())
    }

    async fn finalize_round(
        &self,
        round_id: u64,
        total_wagered: u64,
        total_profit: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| StoreError::Backend(format!("finalizing unknown round {}", round_id)))?;
        record.total_wagered = total_wagered;
        record.total_profit = total_profit;
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rounds
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Pause flag kept in process memory; durable backends replace this.
#[derive(Default)]
pub struct MemoryPauseStore {
    value: AtomicBool,
}

impl MemoryPauseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PauseStore for MemoryPauseStore {
    async fn get(&self) -> Result<bool, StoreError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    async fn set(&self, value: bool) -> Result<(), StoreError> {
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_refuses_to_overdraw() {
        let store = InMemoryStore::new();
        let p = store.create_player("alice", 500);

        assert!(store.debit_if_sufficient(p, 400).await.unwrap());
        assert!(!store.debit_if_sufficient(p, 200).await.unwrap());
        assert_eq!(store.balance(p).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn drain_applies_per_wager_checks_in_order() {
        let store = InMemoryStore::new();
        let rich = store.create_player("rich", 10_000);
        let broke = store.create_player("broke", 50);

        let flags = store
            .drain_stakes(&[(rich, 1_000), (broke, 100)])
            .await
            .unwrap();

        assert_eq!(flags, vec![true, false]);
        assert_eq!(store.balance(rich).await.unwrap(), 9_000);
        assert_eq!(store.balance(broke).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn settlement_assigns_consecutive_sequence_numbers() {
        let store = InMemoryStore::new();
        let p = store.create_player("alice", 0);

        for round in 0..3 {
            store
                .apply_settlement(
                    round,
                    250,
                    &[SettlementEntry {
                        player: p,
                        stake: 5,
                        cashout: Some(150),
                        profit: 750,
                    }],
                )
                .await
                .unwrap();
        }

        let history = store.history(p);
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(store.balance(p).await.unwrap(), 3 * 750);
    }

    #[test]
    fn seed_chain_links_by_sha256() {
        let store = InMemoryStore::with_seed_chain(8);
        let inner = store.inner.lock().unwrap();
        for pair in inner.seeds.windows(2) {
            let digest = Sha256::digest(pair[1]);
            assert_eq!(pair[0][..], digest[..]);
        }
    }

    #[tokio::test]
    async fn next_round_id_resumes_after_the_last_executed_round() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_round_id().await.unwrap(), 0);

        store
            .save_round(&RoundRecord {
                id: 4,
                seed_hex: "00".into(),
                bust: 100,
                total_wagered: 0,
                total_profit: 0,
            })
            .await
            .unwrap();

        assert_eq!(store.next_round_id().await.unwrap(), 5);
    }
}
