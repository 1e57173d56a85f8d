//! Configuration for the wallet ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Wallet ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Locking and in-flight wait bounds
    pub locking: LockConfig,

    /// Offline reconciliation limits
    pub reconcile: ReconcileConfig,

    /// Audit event fan-out
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallets"),
            service_name: "wallet-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            locking: LockConfig::default(),
            reconcile: ReconcileConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Locking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Bounded wait for a busy wallet lock (milliseconds)
    pub wallet_lock_timeout_ms: u64,

    /// Bounded wait for a racing in-flight idempotency key (milliseconds)
    pub idempotency_wait_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wallet_lock_timeout_ms: 2_000,
            idempotency_wait_ms: 5_000,
        }
    }
}

/// Offline reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Admission limit on concurrently reconciling batches
    pub max_concurrent_batches: usize,

    /// Upper bound on entries accepted in one batch
    pub max_batch_entries: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 8,
            max_batch_entries: 500,
        }
    }
}

/// Audit sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Capacity of the fire-and-forget audit channel
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Load defaults with environment variable overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WALLET_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("WALLET_LOCK_TIMEOUT_MS") {
            config.locking.wallet_lock_timeout_ms = timeout
                .parse()
                .map_err(|e| crate::Error::Config(format!("bad WALLET_LOCK_TIMEOUT_MS: {e}")))?;
        }

        if let Ok(limit) = std::env::var("WALLET_MAX_CONCURRENT_BATCHES") {
            config.reconcile.max_concurrent_batches = limit.parse().map_err(|e| {
                crate::Error::Config(format!("bad WALLET_MAX_CONCURRENT_BATCHES: {e}"))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "wallet-core");
        assert_eq!(config.locking.wallet_lock_timeout_ms, 2_000);
        assert_eq!(config.reconcile.max_concurrent_batches, 8);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(
            parsed.reconcile.max_batch_entries,
            config.reconcile.max_batch_entries
        );
    }
}
