//! Per-wallet serialization
//!
//! The unit of serialization is a single wallet: all mutating operations on
//! one wallet are serialized for the duration of read-validate-append, while
//! unrelated wallets proceed fully in parallel. Lock waits are bounded; a
//! busy wallet surfaces as a retryable [`Error::LockTimeout`] instead of
//! blocking a reconciliation storm indefinitely.

use crate::error::{Error, Result};
use crate::types::WalletId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Duration;

/// Guard for one wallet's serialization unit
pub type WalletGuard = OwnedMutexGuard<()>;

/// Lock table keyed by wallet
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl WalletLocks {
    /// Create a lock table with the given bounded wait
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn slot(&self, wallet_id: WalletId) -> Arc<Mutex<()>> {
        self.locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire one wallet's serialization unit, bounded by the configured wait
    pub async fn acquire(&self, wallet_id: WalletId) -> Result<WalletGuard> {
        let slot = self.slot(wallet_id);
        tokio::time::timeout(self.timeout, slot.lock_owned())
            .await
            .map_err(|_| Error::LockTimeout(wallet_id.to_string()))
    }

    /// Acquire two wallets in ascending canonical-key order.
    ///
    /// The fixed order is what makes concurrent transfers deadlock-free; no
    /// operation ever holds more than these two wallet locks at once.
    pub async fn acquire_pair(
        &self,
        a: WalletId,
        b: WalletId,
    ) -> Result<(WalletGuard, WalletGuard)> {
        debug_assert_ne!(a, b);
        let (first, second) = if a < b { (a, b) } else { (b, a) };

        let first_guard = self.acquire(first).await?;
        let second_guard = self.acquire(second).await?;

        if a < b {
            Ok((first_guard, second_guard))
        } else {
            Ok((second_guard, first_guard))
        }
    }
}
