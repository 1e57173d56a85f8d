//! Gatecash Wallet Core
//!
//! Append-only wallet ledger for a festival cashless platform.
//!
//! # Architecture
//!
//! - **Event Sourcing**: Every balance change is an immutable ledger entry
//! - **Per-Wallet Serialization**: Conflicting writes on one wallet are
//!   serialized; unrelated wallets proceed in parallel
//! - **Idempotency**: Every mutation carries a caller-supplied key and is
//!   applied at most once, no matter how often it is retried
//! - **Tamper Evidence**: Entries are hash-chained per wallet
//!
//! # Invariants
//!
//! - A wallet balance is always the sum of its applied entries
//! - Entries are never modified or deleted; corrections are new entries
//! - `balance_after = balance_before + amount` for every entry
//! - Balances never go negative unless the wallet allows it

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod money;
pub mod storage;
pub mod types;
pub mod wallet;

// Re-exports
pub use config::Config;
pub use engine::{Submission, TransferSubmission, WalletEngine};
pub use error::{Error, Result};
pub use money::Money;
pub use types::{
    EntryType, LedgerEntry, Origin, Receipt, ReceiptSnapshot, Signature, TransactionRequest,
    TransferReceipt, TransferRequest, Wallet, WalletId, WalletStatus, WalletView,
};
