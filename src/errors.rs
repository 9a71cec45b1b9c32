//! Error types for the round engine.
//!
//! Validation and engagement failures are rejected before any state
//! mutation. `Exhausted` stops round progression but must never tear down
//! the process; live connections and settlement paths stay intact.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stake must be a positive amount, got {0}")]
    InvalidStake(u64),

    #[error("target cashout must be at least 1.01x, got {0}")]
    InvalidCashout(u64),

    #[error("player already has a wager in flight")]
    AlreadyEngaged,

    #[error("player has no cashable wager")]
    NotEngaged,

    #[error("balance does not cover the requested amount")]
    InsufficientFunds,

    #[error("wallet call exceeded its {0}ms deadline")]
    ExternalTimeout(u64),

    #[error("committed seed sequence exhausted at round {0}")]
    Exhausted(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Failures surfaced by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such player: {0}")]
    UnknownPlayer(u64),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Failures surfaced by the external wallet client.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet node rejected the transfer: {0}")]
    Rejected(String),

    #[error("wallet connection is down")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_into_engine_errors() {
        let err: EngineError = StoreError::UnknownPlayer(7).into();
        assert!(matches!(err, EngineError::Store(StoreError::UnknownPlayer(7))));
    }

    #[test]
    fn display_carries_context() {
        assert!(EngineError::ExternalTimeout(5000).to_string().contains("5000ms"));
        assert!(EngineError::Exhausted(42).to_string().contains("42"));
    }
}
