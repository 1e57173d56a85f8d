//! Main wallet engine
//!
//! Ties together storage, the entry store, per-wallet locking, the
//! idempotency resolver, metrics and the audit sink into the API surface
//! consumed by the transaction endpoints and the offline reconciler.
//!
//! # Example
//!
//! ```no_run
//! use wallet_core::{Config, EntryType, Money, TransactionRequest, WalletEngine, WalletId};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> wallet_core::Result<()> {
//!     let engine = WalletEngine::open(Config::default())?;
//!     let wallet_id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());
//!
//!     let submission = engine
//!         .submit(TransactionRequest::online(
//!             wallet_id,
//!             EntryType::TopUp,
//!             Money::from_minor(2000),
//!             "t1",
//!         ))
//!         .await?;
//!     println!("balance: {}", submission.receipt.balance_after);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    config::Config,
    error::{Error, Result},
    events::{AuditEvent, AuditSink, NullSink},
    idempotency::IdempotencyResolver,
    ledger::EntryStore,
    metrics::Metrics,
    money::Money,
    storage::Storage,
    types::{
        EntryType, LedgerEntry, Origin, Receipt, ReceiptSnapshot, TransactionRequest,
        TransferReceipt, TransferRequest, Wallet, WalletId, WalletStatus, WalletView,
    },
    wallet,
    locks::WalletLocks,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use uuid::Uuid;

/// Outcome of a single-wallet mutation
#[derive(Debug, Clone)]
pub struct Submission {
    /// The (possibly stored) receipt
    pub receipt: Receipt,
    /// True if a stored result was replayed instead of applying anything
    pub replayed: bool,
}

/// Outcome of a transfer
#[derive(Debug, Clone)]
pub struct TransferSubmission {
    /// The (possibly stored) receipt
    pub receipt: TransferReceipt,
    /// True if a stored result was replayed instead of applying anything
    pub replayed: bool,
}

/// Main wallet ledger interface
pub struct WalletEngine {
    storage: Arc<Storage>,
    store: Arc<EntryStore>,
    locks: Arc<WalletLocks>,
    resolver: Arc<IdempotencyResolver>,
    metrics: Metrics,
    audit: Arc<dyn AuditSink>,
    config: Config,
}

impl WalletEngine {
    /// Open the engine with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let store = Arc::new(EntryStore::open(storage.clone())?);
        let locks = Arc::new(WalletLocks::new(Duration::from_millis(
            config.locking.wallet_lock_timeout_ms,
        )));
        let resolver = Arc::new(IdempotencyResolver::new(
            storage.clone(),
            Duration::from_millis(config.locking.idempotency_wait_ms),
        ));
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {e}")))?;

        Ok(Self {
            storage,
            store,
            locks,
            resolver,
            metrics,
            audit: Arc::new(NullSink),
            config,
        })
    }

    /// Replace the audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Committed result for an idempotency key, if any
    pub fn committed_snapshot(&self, key: &str) -> Result<Option<ReceiptSnapshot>> {
        self.resolver.committed(key)
    }

    /// Last accepted offline sequence for a device
    pub fn device_sequence(&self, device_id: Uuid) -> Result<Option<u64>> {
        self.storage.device_sequence(device_id)
    }

    /// Provision a wallet explicitly; idempotent if it already exists
    pub async fn open_wallet(&self, id: WalletId, allow_negative: bool) -> Result<WalletView> {
        let _guard = self.acquire(id).await?;

        if let Some(existing) = self.storage.wallet(&id)? {
            return Ok(WalletView::from(&existing));
        }

        let wallet = Wallet::new(id, allow_negative, Utc::now());
        self.storage.put_wallet(&wallet)?;
        tracing::info!(wallet_id = %id, allow_negative, "wallet opened");
        Ok(WalletView::from(&wallet))
    }

    /// Current wallet projection
    pub fn wallet(&self, id: WalletId) -> Result<WalletView> {
        let wallet = self
            .storage
            .wallet(&id)?
            .ok_or_else(|| Error::UnknownWallet(id.to_string()))?;
        Ok(WalletView::from(&wallet))
    }

    /// Apply a single-wallet transaction, exactly once per idempotency key.
    ///
    /// Validation failures are returned synchronously and leave no trace;
    /// retries of a committed key replay the stored receipt.
    pub async fn submit(&self, request: TransactionRequest) -> Result<Submission> {
        if request.idempotency_key.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if matches!(request.entry_type, EntryType::Transfer) {
            return Err(Error::InvalidRequest(
                "transfers go through WalletEngine::transfer".to_string(),
            ));
        }
        wallet::validate_amount(request.entry_type, request.amount)?;

        let started = Instant::now();
        let key = request.idempotency_key.clone();

        let result = self
            .resolver
            .resolve(&key, || self.apply_single(request))
            .await;

        match result {
            Ok(resolution) => {
                self.metrics
                    .record_apply_duration(started.elapsed().as_secs_f64());
                let replayed = resolution.replayed();
                if replayed {
                    self.metrics.record_replay();
                }
                match resolution.into_snapshot() {
                    ReceiptSnapshot::Single(receipt) => Ok(Submission { receipt, replayed }),
                    ReceiptSnapshot::Transfer(_) => Err(Error::Conflict(format!(
                        "idempotency key {key} is bound to a transfer"
                    ))),
                }
            }
            Err(e) => {
                self.metrics.record_rejection(rejection_reason(&e));
                Err(e)
            }
        }
    }

    /// Move funds between two wallets, exactly once per idempotency key.
    ///
    /// Both legs commit in one atomic unit; the wallet locks are taken in
    /// ascending canonical-key order.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferSubmission> {
        if request.idempotency_key.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if request.from == request.to {
            return Err(Error::InvalidRequest(
                "transfer requires two distinct wallets".to_string(),
            ));
        }
        if request.amount.is_zero() || request.amount.is_negative() {
            return Err(Error::InvalidAmount(
                "transfer amount must be positive".to_string(),
            ));
        }

        let started = Instant::now();
        let key = request.idempotency_key.clone();

        let result = self
            .resolver
            .resolve(&key, || self.apply_transfer(request))
            .await;

        match result {
            Ok(resolution) => {
                self.metrics
                    .record_apply_duration(started.elapsed().as_secs_f64());
                let replayed = resolution.replayed();
                if replayed {
                    self.metrics.record_replay();
                }
                match resolution.into_snapshot() {
                    ReceiptSnapshot::Transfer(receipt) => {
                        Ok(TransferSubmission { receipt, replayed })
                    }
                    ReceiptSnapshot::Single(_) => Err(Error::Conflict(format!(
                        "idempotency key {key} is bound to a single entry"
                    ))),
                }
            }
            Err(e) => {
                self.metrics.record_rejection(rejection_reason(&e));
                Err(e)
            }
        }
    }

    /// Freeze a wallet (spending blocked, credits still accepted)
    pub async fn freeze(&self, id: WalletId) -> Result<WalletView> {
        self.set_status(id, WalletStatus::Frozen).await
    }

    /// Reactivate a frozen wallet
    pub async fn unfreeze(&self, id: WalletId) -> Result<WalletView> {
        self.set_status(id, WalletStatus::Active).await
    }

    /// Soft-close a wallet; terminal, history is retained
    pub async fn close(&self, id: WalletId) -> Result<WalletView> {
        self.set_status(id, WalletStatus::Closed).await
    }

    /// Full entry history for a wallet from a sequence offset
    pub fn entries(&self, id: WalletId, since_sequence: u64) -> Result<Vec<LedgerEntry>> {
        self.store
            .entries_for_wallet(&id, since_sequence)?
            .collect()
    }

    /// Replay the ledger and return the reconstructed balance
    pub fn rebuild_balance(&self, id: WalletId) -> Result<Money> {
        let (balance, _) = wallet::rebuild_balance(self.store.entries_for_wallet(&id, 0)?)?;
        Ok(balance)
    }

    /// Audit a wallet: verify the hash chain, the balance chain, and that
    /// the cached row matches the replayed ledger. Returns the entry count.
    pub fn verify_wallet(&self, id: WalletId) -> Result<u64> {
        let wallet = self
            .storage
            .wallet(&id)?
            .ok_or_else(|| Error::UnknownWallet(id.to_string()))?;

        let entries = self.store.verify_chain(&id)?;
        let (rebuilt, count) = wallet::rebuild_balance(self.store.entries_for_wallet(&id, 0)?)?;
        wallet::reconcile_cache(&wallet, rebuilt, count)?;

        Ok(entries)
    }

    // Internal

    async fn acquire(&self, id: WalletId) -> Result<crate::locks::WalletGuard> {
        match self.locks.acquire(id).await {
            Ok(guard) => Ok(guard),
            Err(e) => {
                if matches!(e, Error::LockTimeout(_)) {
                    self.metrics.record_lock_timeout();
                }
                Err(e)
            }
        }
    }

    async fn apply_single(&self, request: TransactionRequest) -> Result<ReceiptSnapshot> {
        let _guard = self.acquire(request.wallet_id).await?;

        let now = Utc::now();
        let wallet = match self.storage.wallet(&request.wallet_id)? {
            Some(wallet) => wallet,
            // A wallet comes into existence on its first top-up
            None if matches!(request.entry_type, EntryType::TopUp | EntryType::CashIn) => {
                Wallet::new(request.wallet_id, false, now)
            }
            None => return Err(Error::UnknownWallet(request.wallet_id.to_string())),
        };

        wallet.ensure_accepts(request.entry_type)?;
        if let Some(expected) = request.expected_version {
            wallet.ensure_version(expected)?;
        }
        let balance_after = wallet.projected_balance(request.amount)?;

        let (offline_created, client_created_at, device_id, device_sequence, signature) =
            match &request.origin {
                Origin::Online => (false, now, None, None, None),
                Origin::Offline {
                    device_id,
                    device_sequence,
                    client_created_at,
                    signature,
                } => (
                    true,
                    *client_created_at,
                    Some(*device_id),
                    Some(*device_sequence),
                    Some(signature.clone()),
                ),
            };
        let device_update = device_id.zip(device_sequence);

        let entry = LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id: request.wallet_id,
            entry_type: request.entry_type,
            amount: request.amount,
            balance_before: wallet.balance,
            balance_after,
            sequence: 0,
            idempotency_key: request.idempotency_key.clone(),
            stand_id: request.stand_id,
            operator_id: request.operator_id,
            offline_created,
            client_created_at,
            server_applied_at: now,
            device_id,
            device_sequence,
            signature,
            reference: request.reference.clone(),
            chain_hash: [0u8; 32],
        };

        let updated = wallet.applied(&entry, now);
        let (entry, receipt) = self.store.append(entry, &updated, device_update)?;

        self.audit.emit(AuditEvent::from_entry(&entry));
        self.metrics.record_append();

        Ok(ReceiptSnapshot::Single(receipt))
    }

    async fn apply_transfer(&self, request: TransferRequest) -> Result<ReceiptSnapshot> {
        let _guards = match self.locks.acquire_pair(request.from, request.to).await {
            Ok(guards) => guards,
            Err(e) => {
                if matches!(e, Error::LockTimeout(_)) {
                    self.metrics.record_lock_timeout();
                }
                return Err(e);
            }
        };

        let now = Utc::now();
        let from = self
            .storage
            .wallet(&request.from)?
            .ok_or_else(|| Error::UnknownWallet(request.from.to_string()))?;
        let to = self
            .storage
            .wallet(&request.to)?
            .ok_or_else(|| Error::UnknownWallet(request.to.to_string()))?;

        from.ensure_accepts(EntryType::Transfer)?;
        to.ensure_accepts(EntryType::Transfer)?;

        let debit_amount = request.amount.negated()?;
        let from_after = from.projected_balance(debit_amount)?;
        let to_after = to.projected_balance(request.amount)?;

        let debit = LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id: request.from,
            entry_type: EntryType::Transfer,
            amount: debit_amount,
            balance_before: from.balance,
            balance_after: from_after,
            sequence: 0,
            idempotency_key: format!("{}:out", request.idempotency_key),
            stand_id: None,
            operator_id: request.operator_id,
            offline_created: false,
            client_created_at: now,
            server_applied_at: now,
            device_id: None,
            device_sequence: None,
            signature: None,
            reference: None,
            chain_hash: [0u8; 32],
        };

        let credit = LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id: request.to,
            entry_type: EntryType::Transfer,
            amount: request.amount,
            balance_before: to.balance,
            balance_after: to_after,
            sequence: 0,
            idempotency_key: format!("{}:in", request.idempotency_key),
            stand_id: None,
            operator_id: request.operator_id,
            offline_created: false,
            client_created_at: now,
            server_applied_at: now,
            device_id: None,
            device_sequence: None,
            signature: None,
            reference: None,
            chain_hash: [0u8; 32],
        };

        let from_updated = from.applied(&debit, now);
        let to_updated = to.applied(&credit, now);

        let receipt = self.store.append_transfer(
            debit.clone(),
            credit.clone(),
            &from_updated,
            &to_updated,
            &request.idempotency_key,
        )?;

        self.audit.emit(AuditEvent::from_entry(&debit));
        self.audit.emit(AuditEvent::from_entry(&credit));
        self.metrics.record_append();
        self.metrics.record_append();

        Ok(ReceiptSnapshot::Transfer(receipt))
    }

    async fn set_status(&self, id: WalletId, status: WalletStatus) -> Result<WalletView> {
        let _guard = self.acquire(id).await?;

        let wallet = self
            .storage
            .wallet(&id)?
            .ok_or_else(|| Error::UnknownWallet(id.to_string()))?;

        if wallet.status == status {
            return Ok(WalletView::from(&wallet));
        }
        if wallet.status == WalletStatus::Closed {
            return Err(Error::WalletClosed(id.to_string()));
        }

        let updated = wallet.with_status(status, Utc::now());
        self.storage.put_wallet(&updated)?;
        tracing::info!(wallet_id = %id, ?status, "wallet status changed");
        Ok(WalletView::from(&updated))
    }
}

/// Metric label for a failed mutation
fn rejection_reason(error: &Error) -> &'static str {
    match error {
        Error::InsufficientBalance { .. } => "insufficient_balance",
        Error::WalletFrozen(_) => "wallet_frozen",
        Error::WalletClosed(_) => "wallet_closed",
        Error::UnknownWallet(_) => "unknown_wallet",
        Error::VersionConflict { .. } => "version_conflict",
        Error::LockTimeout(_) => "lock_timeout",
        Error::Conflict(_) => "conflict",
        Error::RetryAfter(_) => "retry_after",
        Error::InvalidAmount(_) | Error::InvalidRequest(_) => "invalid_request",
        Error::ArithmeticOverflow => "overflow",
        _ => "internal",
    }
}
