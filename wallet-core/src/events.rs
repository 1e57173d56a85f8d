//! Audit event fan-out
//!
//! One event per applied ledger entry for downstream analytics/alerting.
//! Delivery is fire-and-forget: emission never blocks and never fails the
//! committing transaction. A full channel drops the event with a warning.

use crate::money::Money;
use crate::types::{EntryType, LedgerEntry, WalletId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event emitted after a ledger entry commits
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// The committed entry
    pub entry_id: Uuid,
    /// Wallet affected
    pub wallet_id: WalletId,
    /// Entry type
    pub entry_type: EntryType,
    /// Signed amount
    pub amount: Money,
    /// Balance after application
    pub balance_after: Money,
    /// Whether the entry was created offline
    pub offline_created: bool,
    /// Durable append timestamp
    pub applied_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build the event for a committed entry
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            wallet_id: entry.wallet_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            offline_created: entry.offline_created,
            applied_at: entry.server_applied_at,
        }
    }
}

/// Downstream sink for audit events; implementations must never block
pub trait AuditSink: Send + Sync {
    /// Emit one event, best-effort
    fn emit(&self, event: AuditEvent);
}

/// Sink that discards everything; default for embedded use
#[derive(Debug, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Channel-backed sink; the consumer half belongs to the embedding service
pub struct ChannelSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelSink {
    /// Create a sink and its consumer half
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelSink {
    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("audit event dropped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event() -> AuditEvent {
        AuditEvent {
            entry_id: Uuid::now_v7(),
            wallet_id: WalletId::new(Uuid::new_v4(), Uuid::new_v4()),
            entry_type: EntryType::Purchase,
            amount: Money::from_minor(-300),
            balance_after: Money::from_minor(700),
            offline_created: true,
            applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.emit(event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.balance_after, Money::from_minor(700));
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.emit(event());
        // Second emit hits a full channel and must return immediately
        sink.emit(event());
    }

    #[test]
    fn test_event_serializes_for_downstream() {
        let rendered = serde_json::to_string(&event()).unwrap();
        assert!(rendered.contains("\"entry_type\""));
        assert!(rendered.contains("\"balance_after\""));
    }
}
