//! Batch reconciliation engine
//!
//! Processes uploaded offline batches against the wallet ledger. Entries are
//! handled in upload order, one device at a time per device, with a global
//! admission limit so a storm of reconnecting stands cannot saturate the
//! wallet-lock subsystem. The batch is never atomic: each entry succeeds or
//! fails on its own and every outcome is reported.
//!
//! Per entry:
//!
//! 1. Verify device and signature; on failure mark `Rejected` and move on
//! 2. Consult the idempotency store; a committed key short-circuits to
//!    `AlreadyApplied`, which is what makes batch re-upload after a dropped
//!    connection fully safe
//! 3. Check device-sequence freshness (replay protection)
//! 4. Apply through the wallet engine: per-wallet lock, validation against
//!    the current server balance, atomic append

use crate::{
    error::{Error, Result},
    registry::DeviceRegistry,
    types::{BatchReport, EntryOutcome, EntryResult, OfflineBatch, RejectReason, SignedIntent},
    verifier::IntentVerifier,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;
use wallet_core::{Origin, ReceiptSnapshot, TransactionRequest, WalletEngine};

/// Offline transaction reconciler
pub struct Reconciler {
    engine: Arc<WalletEngine>,
    verifier: IntentVerifier,

    /// Global admission limit on concurrently reconciling batches
    admission: Arc<Semaphore>,

    /// One batch at a time per device
    device_gates: DashMap<Uuid, Arc<Mutex<()>>>,

    max_batch_entries: usize,
}

impl Reconciler {
    /// Create a reconciler over the wallet engine and a device registry
    pub fn new(engine: Arc<WalletEngine>, registry: Arc<dyn DeviceRegistry>) -> Self {
        let reconcile = engine.config().reconcile.clone();
        Self {
            verifier: IntentVerifier::new(registry),
            admission: Arc::new(Semaphore::new(reconcile.max_concurrent_batches)),
            device_gates: DashMap::new(),
            max_batch_entries: reconcile.max_batch_entries,
            engine,
        }
    }

    /// Reconcile one uploaded batch, reporting a per-entry outcome for every
    /// intent in upload order.
    pub async fn process_batch(&self, batch: OfflineBatch) -> Result<BatchReport> {
        if batch.entries.len() > self.max_batch_entries {
            return Err(Error::BatchTooLarge {
                entries: batch.entries.len(),
                limit: self.max_batch_entries,
            });
        }

        let _permit = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::AdmissionClosed)?;

        let gate = self.device_gate(batch.device_id);
        let _gate = gate.lock().await;

        let batch_id = Uuid::now_v7();
        let received_at = Utc::now();

        tracing::info!(
            batch_id = %batch_id,
            device_id = %batch.device_id,
            entries = batch.entries.len(),
            "reconciling offline batch"
        );

        let mut results = Vec::with_capacity(batch.entries.len());
        for intent in batch.entries {
            let idempotency_key = intent.idempotency_key.clone();
            let device_sequence = intent.device_sequence;

            let outcome = self.apply_intent(batch.device_id, intent).await;

            if let EntryOutcome::Rejected { reason, detail } = &outcome {
                tracing::warn!(
                    batch_id = %batch_id,
                    idempotency_key = %idempotency_key,
                    reason = reason.as_str(),
                    detail = %detail,
                    "offline entry rejected"
                );
            }

            results.push(EntryResult {
                idempotency_key,
                device_sequence,
                outcome,
            });
        }

        self.engine.metrics().record_batch(results.len());

        let report = BatchReport {
            batch_id,
            device_id: batch.device_id,
            received_at,
            results,
        };

        tracing::info!(
            batch_id = %batch_id,
            applied = report.applied(),
            already_applied = report.already_applied(),
            rejected = report.rejected(),
            "offline batch reconciled"
        );

        Ok(report)
    }

    // Internal

    fn device_gate(&self, device_id: Uuid) -> Arc<Mutex<()>> {
        self.device_gates
            .entry(device_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Rejection for a failure the wallet engine has not already counted
    fn reject(&self, error: Error) -> EntryOutcome {
        let outcome = rejected_from(error);
        if let EntryOutcome::Rejected { reason, .. } = &outcome {
            self.engine.metrics().record_rejection(reason.as_str());
        }
        outcome
    }

    async fn apply_intent(&self, device_id: Uuid, intent: SignedIntent) -> EntryOutcome {
        // 1. Origin: device known, signature verifies
        if let Err(e) = self.verifier.verify_origin(device_id, &intent) {
            return self.reject(e);
        }

        // 2. Idempotency short-circuit, ahead of the sequence watermark so
        //    re-uploaded batches replay instead of tripping replay protection
        match self.engine.committed_snapshot(&intent.idempotency_key) {
            Ok(Some(ReceiptSnapshot::Single(receipt))) => {
                return EntryOutcome::AlreadyApplied {
                    entry_id: receipt.entry_id,
                    balance_after: receipt.balance_after,
                };
            }
            Ok(Some(ReceiptSnapshot::Transfer(_))) => {
                return self.reject(Error::Core(wallet_core::Error::Conflict(format!(
                    "idempotency key {} is bound to a transfer",
                    intent.idempotency_key
                ))));
            }
            Ok(None) => {}
            Err(e) => return self.reject(Error::Core(e)),
        }

        // 3. Device sequence monotonicity
        if let Err(e) =
            self.verifier
                .ensure_fresh_sequence(&self.engine, device_id, intent.device_sequence)
        {
            return self.reject(e);
        }

        // 4-7. Per-wallet lock, validation against the current server
        // balance, atomic append; the engine owns those steps and their
        // metrics
        let request = TransactionRequest {
            wallet_id: intent.wallet_id,
            entry_type: intent.entry_type,
            amount: intent.amount,
            idempotency_key: intent.idempotency_key.clone(),
            stand_id: intent.stand_id,
            operator_id: intent.operator_id,
            reference: None,
            expected_version: None,
            origin: Origin::Offline {
                device_id,
                device_sequence: intent.device_sequence,
                client_created_at: intent.client_created_at,
                signature: intent.signature.clone(),
            },
        };

        match self.engine.submit(request).await {
            Ok(submission) if submission.replayed => EntryOutcome::AlreadyApplied {
                entry_id: submission.receipt.entry_id,
                balance_after: submission.receipt.balance_after,
            },
            Ok(submission) => EntryOutcome::Applied {
                entry_id: submission.receipt.entry_id,
                balance_after: submission.receipt.balance_after,
            },
            Err(e) => rejected_from(Error::Core(e)),
        }
    }
}

/// Map a reconciliation failure onto a reported rejection
fn rejected_from(error: Error) -> EntryOutcome {
    let reason = match &error {
        Error::UnknownDevice(_) => RejectReason::UnknownDevice,
        Error::SignatureMismatch(_) => RejectReason::InvalidSignature,
        Error::ReplayedSequence { .. } => RejectReason::ReplayedSequence,
        Error::Core(core) => match core {
            wallet_core::Error::InsufficientBalance { .. } => RejectReason::InsufficientBalance,
            wallet_core::Error::WalletFrozen(_) => RejectReason::WalletFrozen,
            wallet_core::Error::WalletClosed(_) => RejectReason::WalletClosed,
            wallet_core::Error::UnknownWallet(_) => RejectReason::UnknownWallet,
            wallet_core::Error::InvalidAmount(_) | wallet_core::Error::InvalidRequest(_) => {
                RejectReason::InvalidAmount
            }
            wallet_core::Error::LockTimeout(_) => RejectReason::LockTimeout,
            wallet_core::Error::RetryAfter(_) | wallet_core::Error::Conflict(_) => {
                RejectReason::Busy
            }
            _ => RejectReason::Internal,
        },
        Error::BatchTooLarge { .. } | Error::AdmissionClosed => RejectReason::Internal,
    };

    EntryOutcome::Rejected {
        reason,
        detail: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_mapping() {
        let outcome = rejected_from(Error::SignatureMismatch(Uuid::new_v4()));
        assert!(matches!(
            outcome,
            EntryOutcome::Rejected {
                reason: RejectReason::InvalidSignature,
                ..
            }
        ));

        let outcome = rejected_from(Error::Core(wallet_core::Error::InsufficientBalance {
            available: wallet_core::Money::from_minor(700),
            requested: wallet_core::Money::from_minor(-800),
        }));
        assert!(matches!(
            outcome,
            EntryOutcome::Rejected {
                reason: RejectReason::InsufficientBalance,
                ..
            }
        ));

        let outcome = rejected_from(Error::Core(wallet_core::Error::LockTimeout(
            "w".to_string(),
        )));
        match outcome {
            EntryOutcome::Rejected { reason, .. } => assert!(reason.retryable()),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
