//! External wallet collaborator and the withdrawal path.
//!
//! The engine never speaks the wallet protocol itself: it submits outgoing
//! transfers through [`WalletClient`] and reads a cached custodial balance
//! for bankroll math. Withdrawals are serialized through the
//! [`SerializedTransactionQueue`] so a failing transfer's rollback can
//! never race the next withdrawal's balance check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::types::{PlayerId, MULTIPLIER_ONE};
use crate::errors::{EngineError, EngineResult, StoreError, WalletError};
use crate::events::{EngineEvent, EventBus};
use crate::store::Persistence;
use crate::txqueue::SerializedTransactionQueue;

#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Submit an outgoing transfer of `amount` raw currency units.
    async fn submit_transfer(&self, to: &str, amount: u64, memo: &str) -> Result<(), WalletError>;

    /// Cached custodial balance in raw currency units. Kept current by the
    /// wallet connection layer, read here without blocking.
    fn custodial_balance(&self) -> u64;
}

/// Custodial funds not owed to any player account, in balance units
/// (fixed-point hundredths). The basis for every safety-cap computation.
pub async fn unallocated_balance(
    store: &dyn Persistence,
    wallet: &dyn WalletClient,
) -> Result<u64, StoreError> {
    let custodial = MULTIPLIER_ONE * wallet.custodial_balance();
    Ok(custodial.saturating_sub(store.total_allocated().await?))
}

/// Debits a player's balance and broadcasts the transfer, in process-global
/// order, with a deadline and compensating rollback.
pub struct WithdrawalService {
    store: Arc<dyn Persistence>,
    wallet: Arc<dyn WalletClient>,
    events: EventBus,
    queue: SerializedTransactionQueue,
    timeout_ms: u64,
}

impl WithdrawalService {
    pub fn new(
        store: Arc<dyn Persistence>,
        wallet: Arc<dyn WalletClient>,
        events: EventBus,
        timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            wallet,
            events,
            queue: SerializedTransactionQueue::new(),
            timeout_ms,
        }
    }

    /// Withdraw `amount` raw units to an external address. Returns the new
    /// balance. A transfer that fails or exceeds its deadline leaves the
    /// balance exactly as it was.
    pub async fn withdraw(
        &self,
        player: PlayerId,
        name: &str,
        to: &str,
        amount: u64,
    ) -> EngineResult<u64> {
        if amount == 0 {
            return Err(EngineError::InvalidStake(amount));
        }

        let store = Arc::clone(&self.store);
        let wallet = Arc::clone(&self.wallet);
        let events = self.events.clone();
        let timeout_ms = self.timeout_ms;
        let (name, to) = (name.to_string(), to.to_string());

        self.queue
            .enqueue(async move {
                let debit = MULTIPLIER_ONE * amount;
                if !store.debit_if_sufficient(player, debit).await? {
                    return Err(EngineError::InsufficientFunds);
                }

                let memo = format!("return={};message=Thanks for playing!", name);
                let sent = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    wallet.submit_transfer(&to, amount, &memo),
                )
                .await;

                match sent {
                    Ok(Ok(())) => {
                        info!(player = %name, amount, %to, "withdrawal broadcast");
                        events.publish(EngineEvent::BalanceChanged { player });
                        Ok(store.balance(player).await?)
                    }
                    Ok(Err(err)) => {
                        warn!(player = %name, %err, "withdrawal rejected, rolling back debit");
                        store.credit(player, debit).await?;
                        Err(err.into())
                    }
                    Err(_) => {
                        warn!(player = %name, timeout_ms, "withdrawal deadline exceeded, rolling back debit");
                        store.credit(player, debit).await?;
                        Err(EngineError::ExternalTimeout(timeout_ms))
                    }
                }
            })
            .await
    }
}

/// Wallet stand-in with a fixed custodial balance that records transfers
/// instead of broadcasting them. Used by the demo binary and tests.
pub struct OfflineWallet {
    balance: AtomicU64,
    transfers: Mutex<Vec<(String, u64)>>,
}

impl OfflineWallet {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: AtomicU64::new(balance),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub async fn transfers(&self) -> Vec<(String, u64)> {
        self.transfers.lock().await.clone()
    }
}

#[async_trait]
impl WalletClient for OfflineWallet {
    async fn submit_transfer(&self, to: &str, amount: u64, _memo: &str) -> Result<(), WalletError> {
        self.balance.fetch_sub(amount, Ordering::SeqCst);
        self.transfers.lock().await.push((to.to_string(), amount));
        Ok(())
    }

    fn custodial_balance(&self) -> u64 {
        self.balance.load(Ordering::SeqCst)
    }
}
