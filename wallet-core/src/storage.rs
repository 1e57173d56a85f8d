//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only entry log (key: wallet key || sequence)
//! - `seq_index` - Global sequence index (key: sequence, value: wallet key || entry id)
//! - `wallets` - Cached wallet rows (key: wallet key)
//! - `idempotency` - Idempotency records; doubles as the unique-key constraint
//! - `devices` - Last accepted offline sequence per device (key: device id)
//!
//! Entries are never updated or deleted. The only write path is
//! [`Storage::commit_entries`], which commits entry, wallet row, idempotency
//! record and device watermark in one atomic `WriteBatch`.

use crate::{
    error::{Error, Result},
    types::{IdempotencyRecord, LedgerEntry, Wallet, WalletId},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_SEQ_INDEX: &str = "seq_index";
const CF_WALLETS: &str = "wallets";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_DEVICES: &str = "devices";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for an append-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_SEQ_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_DEVICES, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened wallet storage");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallet rows are read on every mutation; favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {name} not found")))
    }

    fn entry_key(wallet_id: &WalletId, sequence: u64) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..32].copy_from_slice(&wallet_id.storage_key());
        key[32..].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    // Wallet rows

    /// Get a wallet row, if it exists
    pub fn wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(&cf, wallet_id.storage_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Write a wallet row outside an entry commit (creation, status change)
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        self.db
            .put_cf(&cf, wallet.id.storage_key(), bincode::serialize(wallet)?)?;
        Ok(())
    }

    // Idempotency records

    /// Get the durable record for an idempotency key, if committed
    pub fn idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Device watermarks

    /// Last accepted offline sequence for a device
    pub fn device_sequence(&self, device_id: Uuid) -> Result<Option<u64>> {
        let cf = self.cf_handle(CF_DEVICES)?;
        match self.db.get_cf(&cf, device_id.as_bytes())? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt device watermark".to_string()))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    // Entries

    /// Newest entry for a wallet (chain head), if any
    pub fn latest_entry(&self, wallet_id: &WalletId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let upper = Self::entry_key(wallet_id, u64::MAX);
        let prefix = wallet_id.storage_key();

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper[..], Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.len() < 40 || key[..32] != prefix {
                    return Ok(None);
                }
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Ordered, restartable scan of a wallet's entries with sequence >= `since_sequence`
    pub fn entries_for_wallet(
        &self,
        wallet_id: &WalletId,
        since_sequence: u64,
    ) -> Result<EntryIter<'_>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let start = Self::entry_key(wallet_id, since_sequence);
        let inner = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start[..], Direction::Forward));

        Ok(EntryIter {
            inner,
            prefix: wallet_id.storage_key(),
        })
    }

    /// Highest committed global sequence (0 if the store is empty)
    pub fn max_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_SEQ_INDEX)?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::End);

        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt sequence index".to_string()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    // Atomic commit

    /// Commit entries, updated wallet rows, the idempotency record and an
    /// optional device watermark as one atomic unit of work.
    ///
    /// The existence check on the idempotency key is defense in depth; the
    /// resolver is expected to have checked it under the wallet lock already.
    pub fn commit_entries(
        &self,
        entries: &[LedgerEntry],
        wallets: &[Wallet],
        record: &IdempotencyRecord,
        device_update: Option<(Uuid, u64)>,
    ) -> Result<()> {
        let cf_idem = self.cf_handle(CF_IDEMPOTENCY)?;
        if self.db.get_cf(&cf_idem, record.key.as_bytes())?.is_some() {
            return Err(Error::Conflict(record.key.clone()));
        }

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_seq = self.cf_handle(CF_SEQ_INDEX)?;
        let cf_wallets = self.cf_handle(CF_WALLETS)?;

        let mut batch = WriteBatch::default();

        for entry in entries {
            let key = Self::entry_key(&entry.wallet_id, entry.sequence);
            batch.put_cf(&cf_entries, key, bincode::serialize(entry)?);

            let mut seq_value = entry.wallet_id.storage_key().to_vec();
            seq_value.extend_from_slice(entry.entry_id.as_bytes());
            batch.put_cf(&cf_seq, entry.sequence.to_be_bytes(), seq_value);
        }

        for wallet in wallets {
            batch.put_cf(
                &cf_wallets,
                wallet.id.storage_key(),
                bincode::serialize(wallet)?,
            );
        }

        batch.put_cf(&cf_idem, record.key.as_bytes(), bincode::serialize(record)?);

        if let Some((device_id, sequence)) = device_update {
            let cf_devices = self.cf_handle(CF_DEVICES)?;
            batch.put_cf(&cf_devices, device_id.as_bytes(), sequence.to_be_bytes());
        }

        self.db.write(batch)?;

        for entry in entries {
            tracing::debug!(
                entry_id = %entry.entry_id,
                wallet_id = %entry.wallet_id,
                entry_type = %entry.entry_type,
                sequence = entry.sequence,
                balance_after = %entry.balance_after,
                "ledger entry appended"
            );
        }

        Ok(())
    }
}

/// Ordered iterator over one wallet's entries
pub struct EntryIter<'a> {
    inner: rocksdb::DBIteratorWithThreadMode<'a, DB>,
    prefix: [u8; 32],
}

impl Iterator for EntryIter<'_> {
    type Item = Result<LedgerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            None => None,
            Some(Err(e)) => Some(Err(e.into())),
            Some(Ok((key, value))) => {
                if key.len() < 40 || key[..32] != self.prefix {
                    return None;
                }
                Some(bincode::deserialize(&value).map_err(Error::from))
            }
        }
    }
}
