//! Gatecash Offline Reconciler
//!
//! Accepts batches of locally-signed transaction intents created while a
//! stand device was disconnected, validates them against the authoritative
//! wallet ledger, and applies them in causal order.
//!
//! # Guarantees
//!
//! - Every intent is verified against the device's registered key
//! - Re-uploading a processed batch yields identical per-entry outcomes and
//!   appends nothing
//! - Intents from one device apply in device-sequence order, never reordered
//! - One bad entry never blocks the rest of its batch
//! - Debits validate against the current server balance; a device's stale
//!   local balance is never consulted

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod engine;
pub mod error;
pub mod registry;
pub mod types;
pub mod verifier;

// Re-exports
pub use engine::Reconciler;
pub use error::{Error, Result};
pub use registry::{DeviceRecord, DeviceRegistry, InMemoryRegistry};
pub use types::{
    BatchReport, EntryOutcome, EntryResult, OfflineBatch, RejectReason, SignedIntent,
};
pub use verifier::IntentVerifier;
