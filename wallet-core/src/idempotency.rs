//! Idempotency resolver
//!
//! Every entry point that appends a ledger entry goes through
//! [`IdempotencyResolver::resolve`]; there is no second deduplication
//! mechanism anywhere. A key resolves to exactly one result forever:
//! replays get the stored snapshot back without re-running business logic.
//!
//! The durable record lives in the `idempotency` column family and is
//! committed in the same `WriteBatch` as the ledger entry, so the unique
//! constraint holds at the storage layer, not only here. The in-process
//! reservation map only arbitrates racing calls inside one process: the
//! winner runs the computation, losers wait (bounded) and then read the
//! winner's stored result. A failed computation leaves no durable state, so
//! a later retry with the same key proceeds cleanly.

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::ReceiptSnapshot,
};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;

/// How a key was resolved
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The computation ran; this is its fresh result
    Fresh(ReceiptSnapshot),
    /// The key had already been applied; this is the stored result
    Replayed(ReceiptSnapshot),
}

impl Resolution {
    /// The snapshot, regardless of how it was obtained
    pub fn snapshot(&self) -> &ReceiptSnapshot {
        match self {
            Resolution::Fresh(snapshot) | Resolution::Replayed(snapshot) => snapshot,
        }
    }

    /// The snapshot, by value
    pub fn into_snapshot(self) -> ReceiptSnapshot {
        match self {
            Resolution::Fresh(snapshot) | Resolution::Replayed(snapshot) => snapshot,
        }
    }

    /// True if the stored result was replayed instead of recomputed
    pub fn replayed(&self) -> bool {
        matches!(self, Resolution::Replayed(_))
    }
}

/// Deduplicates submissions by caller-supplied idempotency key
pub struct IdempotencyResolver {
    storage: Arc<Storage>,

    /// Keys currently being computed in this process
    in_flight: DashMap<String, Arc<Notify>>,

    /// Bounded wait for a racing caller before surfacing `RetryAfter`
    wait_timeout: Duration,
}

impl IdempotencyResolver {
    /// Create a resolver over the given storage
    pub fn new(storage: Arc<Storage>, wait_timeout: Duration) -> Self {
        Self {
            storage,
            in_flight: DashMap::new(),
            wait_timeout,
        }
    }

    /// Look up a committed snapshot without reserving anything
    pub fn committed(&self, key: &str) -> Result<Option<ReceiptSnapshot>> {
        Ok(self
            .storage
            .idempotency_record(key)?
            .map(|record| record.snapshot))
    }

    /// Resolve `key`, running `compute` at most once system-wide.
    ///
    /// `compute` must commit the idempotency record atomically with whatever
    /// it writes; [`crate::ledger::EntryStore::append`] does exactly that.
    pub async fn resolve<F, Fut>(&self, key: &str, compute: F) -> Result<Resolution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ReceiptSnapshot>>,
    {
        if let Some(snapshot) = self.committed(key)? {
            return Ok(Resolution::Replayed(snapshot));
        }

        let notify = Arc::new(Notify::new());
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let winner = occupied.get().clone();
                drop(occupied);

                // Lost the race: wait for the winner, then observe its result.
                let _ = tokio::time::timeout(self.wait_timeout, winner.notified()).await;
                return match self.committed(key)? {
                    Some(snapshot) => Ok(Resolution::Replayed(snapshot)),
                    None => Err(Error::RetryAfter(key.to_string())),
                };
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(notify.clone());
            }
        }

        // Won the reservation; a concurrent caller may have committed between
        // the fast-path read and the reservation, so check once more.
        let result = match self.committed(key) {
            Ok(Some(snapshot)) => Ok(Resolution::Replayed(snapshot)),
            Ok(None) => compute().await.map(Resolution::Fresh),
            Err(e) => Err(e),
        };

        self.in_flight.remove(key);
        notify.notify_waiters();

        if result.is_err() {
            tracing::debug!(key, "idempotency reservation released after failure");
        }

        result
    }
}
