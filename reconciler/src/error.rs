//! Error types for offline reconciliation

use thiserror::Error;
use uuid::Uuid;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet ledger error
    #[error("wallet ledger error: {0}")]
    Core(#[from] wallet_core::Error),

    /// Device key not registered, or revoked
    #[error("unknown or revoked device: {0}")]
    UnknownDevice(Uuid),

    /// Signature does not match the canonical intent (tampering or corruption)
    #[error("signature mismatch for device {0}")]
    SignatureMismatch(Uuid),

    /// Device sequence at or below a previously accepted value
    #[error("replayed sequence {sequence} for device {device_id} (last accepted {last})")]
    ReplayedSequence {
        /// Device that sent the intent
        device_id: Uuid,
        /// Sequence carried by the intent
        sequence: u64,
        /// Highest sequence accepted so far
        last: u64,
    },

    /// Batch exceeds the configured entry limit
    #[error("batch of {entries} entries exceeds the limit of {limit}")]
    BatchTooLarge {
        /// Entries in the submitted batch
        entries: usize,
        /// Configured upper bound
        limit: usize,
    },

    /// Admission semaphore closed; the reconciler is shutting down
    #[error("reconciler is shutting down")]
    AdmissionClosed,
}
