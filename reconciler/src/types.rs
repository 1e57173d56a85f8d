//! Offline batch types
//!
//! A stand device that loses connectivity keeps selling: every local sale
//! becomes a [`SignedIntent`] stamped with the device's monotonic sequence
//! and local clock, held in the device outbox until connectivity returns.
//! The upload is an [`OfflineBatch`]; the response is a [`BatchReport`] with
//! one outcome per entry, never a single pass/fail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wallet_core::crypto::KeyPair;
use wallet_core::{EntryType, Money, Signature, WalletId};

/// A transaction intent produced and signed on a stand device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedIntent {
    /// Target wallet
    pub wallet_id: WalletId,

    /// Entry type; offline devices produce sales, refunds and cash credits
    pub entry_type: EntryType,

    /// Signed amount; positive = credit, negative = debit
    pub amount: Money,

    /// Device-generated idempotency key, unique across the system
    pub idempotency_key: String,

    /// Device-local creation time (not wall-clock trustworthy)
    pub client_created_at: DateTime<Utc>,

    /// Per-device monotonic sequence number
    pub device_sequence: u64,

    /// Stand the sale happened at
    pub stand_id: Option<Uuid>,

    /// Operator logged into the device
    pub operator_id: Option<Uuid>,

    /// Ed25519 signature over [`SignedIntent::signing_bytes`]
    pub signature: Signature,
}

impl SignedIntent {
    /// Canonical signing preimage.
    ///
    /// Length-prefixed field concatenation rather than a struct encoding, so
    /// the signed bytes stay stable as the wire schema evolves. Covers
    /// (wallet, amount, type, client time, device sequence, idempotency key).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + self.idempotency_key.len());
        buf.extend_from_slice(&self.wallet_id.storage_key());
        buf.extend_from_slice(&self.amount.minor_units().to_be_bytes());
        buf.push(self.entry_type as u8);
        buf.extend_from_slice(&self.client_created_at.timestamp_micros().to_be_bytes());
        buf.extend_from_slice(&self.device_sequence.to_be_bytes());
        buf.extend_from_slice(&(self.idempotency_key.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.idempotency_key.as_bytes());
        buf
    }

    /// Sign the canonical preimage with a device key (device-side helper)
    pub fn signed(mut self, keypair: &KeyPair) -> Self {
        self.signature = keypair.sign(&self.signing_bytes());
        self
    }
}

/// A set of signed intents uploaded together from one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineBatch {
    /// Uploading device
    pub device_id: Uuid,

    /// Intents in device outbox order
    pub entries: Vec<SignedIntent>,
}

/// Why an entry was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Signature does not verify against the device key
    InvalidSignature,
    /// Device not registered or revoked
    UnknownDevice,
    /// Device sequence at or below the accepted watermark
    ReplayedSequence,
    /// Current server balance cannot support the debit
    InsufficientBalance,
    /// Wallet status blocks this entry type
    WalletFrozen,
    /// Wallet has been closed
    WalletClosed,
    /// Wallet does not exist
    UnknownWallet,
    /// Amount failed validation
    InvalidAmount,
    /// Wallet lock wait expired; safe to retry
    LockTimeout,
    /// A racing submission holds the idempotency key; safe to retry
    Busy,
    /// Infrastructure failure; safe to retry
    Internal,
}

impl RejectReason {
    /// Stable label for reports, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::UnknownDevice => "unknown_device",
            RejectReason::ReplayedSequence => "replayed_sequence",
            RejectReason::InsufficientBalance => "insufficient_balance",
            RejectReason::WalletFrozen => "wallet_frozen",
            RejectReason::WalletClosed => "wallet_closed",
            RejectReason::UnknownWallet => "unknown_wallet",
            RejectReason::InvalidAmount => "invalid_amount",
            RejectReason::LockTimeout => "lock_timeout",
            RejectReason::Busy => "busy",
            RejectReason::Internal => "internal",
        }
    }

    /// True if the device should keep the entry in its outbox and retry;
    /// false means the entry is dropped and flagged for manual resolution.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RejectReason::LockTimeout | RejectReason::Busy | RejectReason::Internal
        )
    }
}

/// Per-entry outcome of reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// The entry was applied by this upload
    Applied {
        /// Committed ledger entry
        entry_id: Uuid,
        /// Balance after application
        balance_after: Money,
    },
    /// A previous upload already applied this key; stored result returned
    AlreadyApplied {
        /// Previously committed ledger entry
        entry_id: Uuid,
        /// Balance after the original application
        balance_after: Money,
    },
    /// The entry was not applied; surfaced to the operator, never silent
    Rejected {
        /// Why the entry was dropped
        reason: RejectReason,
        /// Human-readable detail for the operator
        detail: String,
    },
}

/// One intent's result within a batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryResult {
    /// The intent's idempotency key
    pub idempotency_key: String,

    /// The intent's device sequence
    pub device_sequence: u64,

    /// What happened
    pub outcome: EntryOutcome,
}

/// Full reconciliation report for one uploaded batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Server-assigned batch ID
    pub batch_id: Uuid,

    /// Uploading device
    pub device_id: Uuid,

    /// When the server received the batch
    pub received_at: DateTime<Utc>,

    /// Per-entry outcomes in upload order
    pub results: Vec<EntryResult>,
}

impl BatchReport {
    /// Entries applied by this upload
    pub fn applied(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, EntryOutcome::Applied { .. }))
            .count()
    }

    /// Entries already applied by an earlier upload
    pub fn already_applied(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, EntryOutcome::AlreadyApplied { .. }))
            .count()
    }

    /// Entries rejected
    pub fn rejected(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, EntryOutcome::Rejected { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(key: &str, sequence: u64) -> SignedIntent {
        SignedIntent {
            wallet_id: WalletId::new(Uuid::new_v4(), Uuid::new_v4()),
            entry_type: EntryType::Purchase,
            amount: Money::from_minor(-300),
            idempotency_key: key.to_string(),
            client_created_at: Utc::now(),
            device_sequence: sequence,
            stand_id: None,
            operator_id: None,
            signature: Signature::from_bytes([0u8; 64]),
        }
    }

    #[test]
    fn test_signing_bytes_are_deterministic_and_cover_fields() {
        let a = intent("k5", 5);
        assert_eq!(a.signing_bytes(), a.signing_bytes());

        let mut b = a.clone();
        b.amount = Money::from_minor(-301);
        assert_ne!(a.signing_bytes(), b.signing_bytes());

        let mut c = a.clone();
        c.device_sequence = 6;
        assert_ne!(a.signing_bytes(), c.signing_bytes());

        let mut d = a.clone();
        d.idempotency_key = "k6".to_string();
        assert_ne!(a.signing_bytes(), d.signing_bytes());
    }

    #[test]
    fn test_signature_does_not_feed_its_own_preimage() {
        let keypair = KeyPair::generate();
        let unsigned = intent("k5", 5);
        let preimage = unsigned.signing_bytes();
        let signed = unsigned.signed(&keypair);

        assert_eq!(signed.signing_bytes(), preimage);
        assert!(signed.signature.verify(&preimage, &keypair.public_key()));
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let rendered = serde_json::to_string(&EntryOutcome::Rejected {
            reason: RejectReason::InsufficientBalance,
            detail: "available 7.00".to_string(),
        })
        .unwrap();
        assert!(rendered.contains("\"outcome\":\"rejected\""));
        assert!(rendered.contains("\"insufficient_balance\""));
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport {
            batch_id: Uuid::now_v7(),
            device_id: Uuid::new_v4(),
            received_at: Utc::now(),
            results: vec![
                EntryResult {
                    idempotency_key: "k1".to_string(),
                    device_sequence: 1,
                    outcome: EntryOutcome::Applied {
                        entry_id: Uuid::now_v7(),
                        balance_after: Money::from_minor(700),
                    },
                },
                EntryResult {
                    idempotency_key: "k2".to_string(),
                    device_sequence: 2,
                    outcome: EntryOutcome::Rejected {
                        reason: RejectReason::InsufficientBalance,
                        detail: String::new(),
                    },
                },
            ],
        };

        assert_eq!(report.applied(), 1);
        assert_eq!(report.already_applied(), 0);
        assert_eq!(report.rejected(), 1);
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(RejectReason::LockTimeout.retryable());
        assert!(RejectReason::Busy.retryable());
        assert!(!RejectReason::InsufficientBalance.retryable());
        assert!(!RejectReason::ReplayedSequence.retryable());
    }
}
