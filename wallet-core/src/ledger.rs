//! Append-only entry store
//!
//! Assigns global sequences, links each wallet's hash chain, and commits
//! everything a mutation produces in one atomic unit of work. Corrections are
//! new CANCEL/REFUND entries; there is no update or delete path.
//!
//! Callers must hold the wallet's serialization unit (see [`crate::locks`])
//! across load, validation and append; the chain-head read below relies on it.

use crate::{
    error::{Error, Result},
    storage::{EntryIter, Storage},
    types::{
        IdempotencyRecord, LedgerEntry, Receipt, ReceiptSnapshot, TransferReceipt, Wallet,
        WalletId,
    },
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Append-only store for ledger entries
pub struct EntryStore {
    storage: Arc<Storage>,

    /// Last assigned global sequence
    last_sequence: AtomicU64,
}

impl EntryStore {
    /// Open the store, recovering the sequence counter from storage
    pub fn open(storage: Arc<Storage>) -> Result<Self> {
        let last_sequence = AtomicU64::new(storage.max_sequence()?);
        Ok(Self {
            storage,
            last_sequence,
        })
    }

    fn next_sequence(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn chain_head(&self, wallet_id: &WalletId) -> Result<[u8; 32]> {
        Ok(self
            .storage
            .latest_entry(wallet_id)?
            .map(|entry| entry.chain_hash)
            .unwrap_or([0u8; 32]))
    }

    /// Durably append one entry together with its updated wallet row.
    ///
    /// Assigns the sequence and chain hash, builds the idempotency record
    /// from the resulting receipt, and commits all of it atomically. Fails
    /// with [`Error::Conflict`] if the idempotency key is already committed.
    pub fn append(
        &self,
        mut entry: LedgerEntry,
        wallet: &Wallet,
        device_update: Option<(Uuid, u64)>,
    ) -> Result<(LedgerEntry, Receipt)> {
        entry.sequence = self.next_sequence();
        entry.chain_hash = entry.compute_chain_hash(&self.chain_head(&entry.wallet_id)?);

        let receipt = Receipt {
            entry_id: entry.entry_id,
            wallet_id: entry.wallet_id,
            balance_after: entry.balance_after,
            status: wallet.status,
            version: wallet.version,
            sequence: entry.sequence,
            applied_at: entry.server_applied_at,
        };

        let record = IdempotencyRecord {
            key: entry.idempotency_key.clone(),
            snapshot: ReceiptSnapshot::Single(receipt.clone()),
            first_seen_at: entry.server_applied_at,
        };

        self.storage.commit_entries(
            std::slice::from_ref(&entry),
            std::slice::from_ref(wallet),
            &record,
            device_update,
        )?;

        Ok((entry, receipt))
    }

    /// Durably append both legs of a transfer as one atomic unit.
    ///
    /// The idempotency record is stored under the caller's key; the legs
    /// carry derived keys so every entry's key stays unique.
    pub fn append_transfer(
        &self,
        mut debit: LedgerEntry,
        mut credit: LedgerEntry,
        from: &Wallet,
        to: &Wallet,
        caller_key: &str,
    ) -> Result<TransferReceipt> {
        debit.sequence = self.next_sequence();
        credit.sequence = self.next_sequence();

        debit.chain_hash = debit.compute_chain_hash(&self.chain_head(&debit.wallet_id)?);
        credit.chain_hash = credit.compute_chain_hash(&self.chain_head(&credit.wallet_id)?);

        let receipt = TransferReceipt {
            debit_entry_id: debit.entry_id,
            credit_entry_id: credit.entry_id,
            from_wallet: debit.wallet_id,
            to_wallet: credit.wallet_id,
            amount: credit.amount,
            from_balance_after: debit.balance_after,
            to_balance_after: credit.balance_after,
            applied_at: debit.server_applied_at,
        };

        let record = IdempotencyRecord {
            key: caller_key.to_string(),
            snapshot: ReceiptSnapshot::Transfer(receipt.clone()),
            first_seen_at: debit.server_applied_at,
        };

        self.storage.commit_entries(
            &[debit, credit],
            &[from.clone(), to.clone()],
            &record,
            None,
        )?;

        Ok(receipt)
    }

    /// Ordered, restartable scan of a wallet's entries
    pub fn entries_for_wallet(
        &self,
        wallet_id: &WalletId,
        since_sequence: u64,
    ) -> Result<EntryIter<'_>> {
        self.storage.entries_for_wallet(wallet_id, since_sequence)
    }

    /// Walk a wallet's full history, verifying the hash chain and the
    /// balance chain. Returns the number of entries verified.
    pub fn verify_chain(&self, wallet_id: &WalletId) -> Result<u64> {
        let mut previous_hash = [0u8; 32];
        let mut previous_after = None;
        let mut count = 0u64;

        for item in self.entries_for_wallet(wallet_id, 0)? {
            let entry = item?;

            if entry.balance_before.add(entry.amount)? != entry.balance_after {
                return Err(Error::ChainIntegrity(format!(
                    "entry {} does not balance: {} + {} != {}",
                    entry.entry_id, entry.balance_before, entry.amount, entry.balance_after
                )));
            }

            if let Some(previous_after) = previous_after {
                if entry.balance_before != previous_after {
                    return Err(Error::ChainIntegrity(format!(
                        "entry {} opens at {}, previous entry closed at {}",
                        entry.entry_id, entry.balance_before, previous_after
                    )));
                }
            }

            let expected = entry.compute_chain_hash(&previous_hash);
            if expected != entry.chain_hash {
                return Err(Error::ChainIntegrity(format!(
                    "entry {} breaks the hash chain",
                    entry.entry_id
                )));
            }

            previous_hash = entry.chain_hash;
            previous_after = Some(entry.balance_after);
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{EntryType, WalletStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_store() -> (EntryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = crate::Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (EntryStore::open(storage).unwrap(), temp_dir)
    }

    fn wallet_fixture(id: WalletId, balance: Money, version: u64) -> Wallet {
        Wallet {
            id,
            balance,
            status: WalletStatus::Active,
            version,
            allow_negative: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry_fixture(
        wallet_id: WalletId,
        entry_type: EntryType,
        amount: i64,
        before: i64,
        key: &str,
    ) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id,
            entry_type,
            amount: Money::from_minor(amount),
            balance_before: Money::from_minor(before),
            balance_after: Money::from_minor(before + amount),
            sequence: 0,
            idempotency_key: key.to_string(),
            stand_id: None,
            operator_id: None,
            offline_created: false,
            client_created_at: Utc::now(),
            server_applied_at: Utc::now(),
            device_id: None,
            device_sequence: None,
            signature: None,
            reference: None,
            chain_hash: [0u8; 32],
        }
    }

    #[test]
    fn test_append_assigns_sequence_and_chain() {
        let (store, _temp) = test_store();
        let id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());

        let wallet = wallet_fixture(id, Money::from_minor(1000), 1);
        let (first, receipt) = store
            .append(
                entry_fixture(id, EntryType::TopUp, 1000, 0, "k1"),
                &wallet,
                None,
            )
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(receipt.balance_after, Money::from_minor(1000));

        let wallet = wallet_fixture(id, Money::from_minor(700), 2);
        let (second, _) = store
            .append(
                entry_fixture(id, EntryType::Purchase, -300, 1000, "k2"),
                &wallet,
                None,
            )
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_ne!(second.chain_hash, first.chain_hash);

        assert_eq!(store.verify_chain(&id).unwrap(), 2);
    }

    #[test]
    fn test_sequence_recovers_after_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = crate::Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());

        {
            let storage = Arc::new(Storage::open(&config).unwrap());
            let store = EntryStore::open(storage).unwrap();
            let wallet = wallet_fixture(id, Money::from_minor(500), 1);
            store
                .append(
                    entry_fixture(id, EntryType::TopUp, 500, 0, "k1"),
                    &wallet,
                    None,
                )
                .unwrap();
        }

        let storage = Arc::new(Storage::open(&config).unwrap());
        let store = EntryStore::open(storage).unwrap();
        let wallet = wallet_fixture(id, Money::from_minor(1000), 2);
        let (entry, _) = store
            .append(
                entry_fixture(id, EntryType::TopUp, 500, 500, "k2"),
                &wallet,
                None,
            )
            .unwrap();
        assert_eq!(entry.sequence, 2);
    }

    #[test]
    fn test_verify_chain_detects_divergence() {
        let (store, _temp) = test_store();
        let id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());

        let wallet = wallet_fixture(id, Money::from_minor(1000), 1);
        store
            .append(
                entry_fixture(id, EntryType::TopUp, 1000, 0, "k1"),
                &wallet,
                None,
            )
            .unwrap();

        // An entry whose opening balance skips the chain head
        let wallet = wallet_fixture(id, Money::from_minor(1200), 2);
        store
            .append(
                entry_fixture(id, EntryType::TopUp, 700, 500, "k2"),
                &wallet,
                None,
            )
            .unwrap();

        assert!(matches!(
            store.verify_chain(&id),
            Err(Error::ChainIntegrity(_))
        ));
    }

    #[test]
    fn test_append_transfer_commits_both_legs() {
        let (store, _temp) = test_store();
        let from_id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());
        let to_id = WalletId::new(Uuid::new_v4(), Uuid::new_v4());

        let from = wallet_fixture(from_id, Money::from_minor(600), 2);
        let to = wallet_fixture(to_id, Money::from_minor(400), 1);

        let debit = entry_fixture(from_id, EntryType::Transfer, -400, 1000, "x1:out");
        let credit = entry_fixture(to_id, EntryType::Transfer, 400, 0, "x1:in");

        let receipt = store
            .append_transfer(debit, credit, &from, &to, "x1")
            .unwrap();

        assert_eq!(receipt.amount, Money::from_minor(400));
        assert_eq!(receipt.from_balance_after, Money::from_minor(600));
        assert_eq!(receipt.to_balance_after, Money::from_minor(400));

        assert_eq!(store.verify_chain(&from_id).unwrap(), 1);
        assert_eq!(store.verify_chain(&to_id).unwrap(), 1);
    }
}
