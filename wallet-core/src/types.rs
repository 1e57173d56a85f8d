//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer minor units, no floats)
//! - Tamper evidence (per-wallet hash chaining)

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Wallet identifier: unique (user, festival) pair
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WalletId {
    /// Attendee that owns the wallet
    pub user_id: Uuid,
    /// Festival the balance is scoped to
    pub festival_id: Uuid,
}

impl WalletId {
    /// Create a wallet ID from its components
    pub fn new(user_id: Uuid, festival_id: Uuid) -> Self {
        Self {
            user_id,
            festival_id,
        }
    }

    /// Canonical 32-byte storage key (user bytes, then festival bytes).
    ///
    /// `Ord` on this type matches the byte order of this key, which is what
    /// lets transfers lock both wallets in a deterministic order.
    pub fn storage_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(self.user_id.as_bytes());
        key[16..].copy_from_slice(self.festival_id.as_bytes());
        key
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.festival_id)
    }
}

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalletStatus {
    /// Accepts all entry types
    Active = 1,
    /// Accepts only entries that return money to the attendee
    Frozen = 2,
    /// Terminal; accepts nothing (soft close, history retained)
    Closed = 3,
}

/// Wallet row: cached balance and status, derived from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet identifier
    pub id: WalletId,

    /// Cached balance; always equals the sum of applied entries
    pub balance: Money,

    /// Lifecycle status
    pub status: WalletStatus,

    /// Monotonic counter for optimistic concurrency
    pub version: u64,

    /// Stand policy: permit the balance to go negative
    pub allow_negative: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Balance-affecting event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// Prepaid credit via external payment
    TopUp = 1,
    /// Credit taken as cash at a stand
    CashIn = 2,
    /// Sale at a stand (debit)
    Purchase = 3,
    /// Returned purchase (credit)
    Refund = 4,
    /// Wallet-to-wallet movement
    Transfer = 5,
    /// Remaining balance paid out (debit)
    CashOut = 6,
    /// Compensating correction for a prior entry
    Cancel = 7,
}

impl EntryType {
    /// Entry types still accepted on a FROZEN wallet.
    ///
    /// Freezing protects the attendee (lost wristband); operations that
    /// return money to the wallet stay open, spending does not.
    pub fn allowed_on_frozen(self) -> bool {
        matches!(self, EntryType::TopUp | EntryType::CashIn | EntryType::Refund)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::TopUp => "top_up",
            EntryType::CashIn => "cash_in",
            EntryType::Purchase => "purchase",
            EntryType::Refund => "refund",
            EntryType::Transfer => "transfer",
            EntryType::CashOut => "cash_out",
            EntryType::Cancel => "cancel",
        };
        write!(f, "{name}")
    }
}

/// Immutable record of one balance-affecting event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Wallet this entry applies to
    pub wallet_id: WalletId,

    /// Event type
    pub entry_type: EntryType,

    /// Signed amount; positive = credit, negative = debit
    pub amount: Money,

    /// Balance before application
    pub balance_before: Money,

    /// Balance after application; always `balance_before + amount`
    pub balance_after: Money,

    /// Store-assigned global sequence, strictly increasing
    pub sequence: u64,

    /// Caller-supplied key; unique across the system
    pub idempotency_key: String,

    /// Stand that produced the entry
    pub stand_id: Option<Uuid>,

    /// Operator that produced the entry
    pub operator_id: Option<Uuid>,

    /// True if the entry was created on a disconnected device
    pub offline_created: bool,

    /// Timestamp from the originating device (may be well in the past)
    pub client_created_at: DateTime<Utc>,

    /// Timestamp of the durable append
    pub server_applied_at: DateTime<Utc>,

    /// Originating device, for offline entries
    pub device_id: Option<Uuid>,

    /// Per-device monotonic sequence, for offline entries
    pub device_sequence: Option<u64>,

    /// Device signature over the canonical intent, for offline entries
    pub signature: Option<Signature>,

    /// External payment reference (gateway confirmation on TOP_UP)
    pub reference: Option<String>,

    /// SHA-256 over (previous chain hash, this entry); tamper evidence
    pub chain_hash: [u8; 32],
}

impl LedgerEntry {
    /// Compute the per-wallet chain hash for this entry.
    ///
    /// Covers the fields that define the entry's financial effect; the
    /// previous hash links the wallet's history into a verifiable chain.
    pub fn compute_chain_hash(&self, previous: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(previous);
        hasher.update(self.entry_id.as_bytes());
        hasher.update(self.wallet_id.storage_key());
        hasher.update([self.entry_type as u8]);
        hasher.update(self.amount.minor_units().to_be_bytes());
        hasher.update(self.balance_before.minor_units().to_be_bytes());
        hasher.update(self.balance_after.minor_units().to_be_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update((self.idempotency_key.len() as u32).to_be_bytes());
        hasher.update(self.idempotency_key.as_bytes());
        hasher.update(
            self.server_applied_at
                .timestamp_micros()
                .to_be_bytes(),
        );
        hasher.finalize().into()
    }
}

/// Digital signature (Ed25519)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature bytes (64 bytes)
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Verify against a message and a 32-byte Ed25519 public key
    pub fn verify(&self, message: &[u8], public_key: &[u8; 32]) -> bool {
        use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};

        let signature = DalekSignature::from_bytes(&self.bytes);

        let verifying_key = match VerifyingKey::from_bytes(public_key) {
            Ok(key) => key,
            Err(_) => return false,
        };

        verifying_key.verify(message, &signature).is_ok()
    }
}

/// Result snapshot returned to the caller of a single-wallet mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// The appended entry
    pub entry_id: Uuid,

    /// Wallet the entry applied to
    pub wallet_id: WalletId,

    /// Balance after application
    pub balance_after: Money,

    /// Wallet status after application
    pub status: WalletStatus,

    /// Wallet version after application
    pub version: u64,

    /// Store-assigned sequence of the entry
    pub sequence: u64,

    /// Durable append timestamp
    pub applied_at: DateTime<Utc>,
}

/// Result snapshot for a wallet-to-wallet transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Debit-leg entry on the source wallet
    pub debit_entry_id: Uuid,

    /// Credit-leg entry on the destination wallet
    pub credit_entry_id: Uuid,

    /// Source wallet
    pub from_wallet: WalletId,

    /// Destination wallet
    pub to_wallet: WalletId,

    /// Transferred amount (positive)
    pub amount: Money,

    /// Source balance after the debit leg
    pub from_balance_after: Money,

    /// Destination balance after the credit leg
    pub to_balance_after: Money,

    /// Durable append timestamp
    pub applied_at: DateTime<Utc>,
}

/// Stored result for an idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReceiptSnapshot {
    /// Key resolved to a single-wallet entry
    Single(Receipt),
    /// Key resolved to a transfer (two entries)
    Transfer(TransferReceipt),
}

/// Durable mapping from an idempotency key to its one-and-only result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The caller-supplied key
    pub key: String,

    /// Snapshot replayed to every retry
    pub snapshot: ReceiptSnapshot,

    /// When the key was first committed
    pub first_seen_at: DateTime<Utc>,
}

/// Read-only wallet projection exposed to collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletView {
    /// Wallet identifier
    pub id: WalletId,
    /// Current balance
    pub balance: Money,
    /// Current status
    pub status: WalletStatus,
    /// Current version
    pub version: u64,
}

impl From<&Wallet> for WalletView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: wallet.id,
            balance: wallet.balance,
            status: wallet.status,
            version: wallet.version,
        }
    }
}

/// Where a transaction request originated
#[derive(Debug, Clone)]
pub enum Origin {
    /// Produced by an online caller; server clock is authoritative
    Online,
    /// Produced on a disconnected device and reconciled later
    Offline {
        /// Originating device
        device_id: Uuid,
        /// Per-device monotonic sequence
        device_sequence: u64,
        /// Device-local creation time
        client_created_at: DateTime<Utc>,
        /// Device signature over the canonical intent
        signature: Signature,
    },
}

/// A single-wallet mutation request
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Target wallet
    pub wallet_id: WalletId,

    /// Entry type to append
    pub entry_type: EntryType,

    /// Signed amount; sign must match the entry type
    pub amount: Money,

    /// Caller-supplied idempotency key
    pub idempotency_key: String,

    /// Stand that originated the request
    pub stand_id: Option<Uuid>,

    /// Operator that originated the request
    pub operator_id: Option<Uuid>,

    /// External payment reference (TOP_UP)
    pub reference: Option<String>,

    /// Optimistic concurrency guard; `None` skips the check
    pub expected_version: Option<u64>,

    /// Online or reconciled-offline origin
    pub origin: Origin,
}

impl TransactionRequest {
    /// Convenience constructor for an online request with no optional fields.
    pub fn online(
        wallet_id: WalletId,
        entry_type: EntryType,
        amount: Money,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            entry_type,
            amount,
            idempotency_key: idempotency_key.into(),
            stand_id: None,
            operator_id: None,
            reference: None,
            expected_version: None,
            origin: Origin::Online,
        }
    }
}

/// A wallet-to-wallet transfer request
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source wallet (debited)
    pub from: WalletId,

    /// Destination wallet (credited)
    pub to: WalletId,

    /// Amount to move; must be positive
    pub amount: Money,

    /// Caller-supplied idempotency key for the whole transfer
    pub idempotency_key: String,

    /// Operator that originated the request
    pub operator_id: Option<Uuid>,
}
