//! Error types for the wallet ledger

use crate::money::Money;
use thiserror::Error;

/// Result type for wallet ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Money arithmetic exceeded the representable range
    #[error("arithmetic overflow in money operation")]
    ArithmeticOverflow,

    /// Amount failed validation (zero, wrong sign for the entry type, unparsable)
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Request is structurally invalid (empty idempotency key, wrong operation)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Wallet does not exist
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    /// Wallet status forbids this entry type
    #[error("wallet {0} is frozen")]
    WalletFrozen(String),

    /// Wallet has been closed
    #[error("wallet {0} is closed")]
    WalletClosed(String),

    /// Debit would take the balance below zero on a wallet that disallows it
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance before the attempted debit
        available: Money,
        /// Signed amount that was requested
        requested: Money,
    },

    /// Optimistic concurrency check failed
    #[error("version conflict: expected {expected}, current {current}")]
    VersionConflict {
        /// Version the caller expected
        expected: u64,
        /// Version actually on the wallet row
        current: u64,
    },

    /// Idempotency key already committed at the storage layer
    #[error("duplicate idempotency key: {0}")]
    Conflict(String),

    /// Another in-flight operation holds this idempotency key; retry later
    #[error("operation in flight for idempotency key {0}, retry later")]
    RetryAfter(String),

    /// Per-wallet lock could not be acquired within the bounded wait
    #[error("lock acquisition timed out for wallet {0}")]
    LockTimeout(String),

    /// Hash chain or balance chain does not reconstruct
    #[error("chain integrity violation: {0}")]
    ChainIntegrity(String),

    /// Cached state diverged from the ledger
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// True for failures the caller may retry with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_)
                | Error::RetryAfter(_)
                | Error::VersionConflict { .. }
                | Error::LockTimeout(_)
                | Error::Storage(_)
                | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::LockTimeout("w".into()).is_retryable());
        assert!(Error::Conflict("k".into()).is_retryable());
        assert!(Error::RetryAfter("k".into()).is_retryable());
        assert!(!Error::ArithmeticOverflow.is_retryable());
        assert!(!Error::InsufficientBalance {
            available: Money::from_minor(100),
            requested: Money::from_minor(-300),
        }
        .is_retryable());
    }
}
