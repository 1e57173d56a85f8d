//! Wallet aggregate rules
//!
//! The wallet row is a cache over the ledger: it is only ever written in the
//! same atomic unit as the entry that changes it, and it can always be
//! reconstructed by replaying the wallet's entries.

use crate::{
    error::{Error, Result},
    money::Money,
    types::{EntryType, LedgerEntry, Wallet, WalletId, WalletStatus},
};
use chrono::{DateTime, Utc};

impl Wallet {
    /// Fresh wallet row; created on first top-up or by explicit provisioning
    pub fn new(id: WalletId, allow_negative: bool, now: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: Money::ZERO,
            status: WalletStatus::Active,
            version: 0,
            allow_negative,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the wallet status admits this entry type
    pub fn ensure_accepts(&self, entry_type: EntryType) -> Result<()> {
        match self.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Frozen if entry_type.allowed_on_frozen() => Ok(()),
            WalletStatus::Frozen => Err(Error::WalletFrozen(self.id.to_string())),
            WalletStatus::Closed => Err(Error::WalletClosed(self.id.to_string())),
        }
    }

    /// Optimistic concurrency guard, layered under the per-wallet lock
    pub fn ensure_version(&self, expected: u64) -> Result<()> {
        if expected != self.version {
            return Err(Error::VersionConflict {
                expected,
                current: self.version,
            });
        }
        Ok(())
    }

    /// Balance after applying a signed delta, enforcing the negative-balance
    /// policy. The current server balance is authoritative; a device's stale
    /// local view never enters this check.
    pub fn projected_balance(&self, amount: Money) -> Result<Money> {
        let after = self.balance.add(amount)?;
        if after.is_negative() && !self.allow_negative {
            return Err(Error::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(after)
    }

    /// The updated row after an entry has been applied
    pub fn applied(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> Wallet {
        let mut updated = self.clone();
        updated.balance = entry.balance_after;
        updated.version = self.version + 1;
        updated.updated_at = now;
        updated
    }

    /// The updated row after a status transition
    pub fn with_status(&self, status: WalletStatus, now: DateTime<Utc>) -> Wallet {
        let mut updated = self.clone();
        updated.status = status;
        updated.version = self.version + 1;
        updated.updated_at = now;
        updated
    }
}

/// Validate an amount against its entry type: non-zero, and signed the way
/// the type demands (credits positive, debits negative).
pub fn validate_amount(entry_type: EntryType, amount: Money) -> Result<()> {
    if amount.is_zero() {
        return Err(Error::InvalidAmount("amount must not be zero".to_string()));
    }

    match entry_type {
        EntryType::TopUp | EntryType::CashIn | EntryType::Refund => {
            if amount.is_negative() {
                return Err(Error::InvalidAmount(format!(
                    "{entry_type} must carry a positive amount"
                )));
            }
        }
        EntryType::Purchase | EntryType::CashOut => {
            if !amount.is_negative() {
                return Err(Error::InvalidAmount(format!(
                    "{entry_type} must carry a negative amount"
                )));
            }
        }
        // Transfer legs are signed by the engine; cancels compensate either way
        EntryType::Transfer | EntryType::Cancel => {}
    }

    Ok(())
}

/// Replay a wallet's entries and return the reconstructed balance with the
/// entry count. Uses checked arithmetic throughout.
pub fn rebuild_balance<I>(entries: I) -> Result<(Money, u64)>
where
    I: IntoIterator<Item = Result<LedgerEntry>>,
{
    let mut balance = Money::ZERO;
    let mut count = 0u64;

    for item in entries {
        let entry = item?;
        balance = balance.add(entry.amount)?;
        count += 1;
    }

    Ok((balance, count))
}

/// Check that the cached wallet row matches the replayed ledger.
pub fn reconcile_cache(wallet: &Wallet, rebuilt: Money, entries: u64) -> Result<()> {
    if wallet.balance != rebuilt {
        return Err(Error::InvariantViolation(format!(
            "wallet {} caches {}, ledger replays to {} over {} entries",
            wallet.id, wallet.balance, rebuilt, entries
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn wallet(status: WalletStatus, balance: i64, allow_negative: bool) -> Wallet {
        Wallet {
            id: WalletId::new(Uuid::new_v4(), Uuid::new_v4()),
            balance: Money::from_minor(balance),
            status,
            version: 3,
            allow_negative,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_accepts_everything() {
        let w = wallet(WalletStatus::Active, 0, false);
        for entry_type in [
            EntryType::TopUp,
            EntryType::Purchase,
            EntryType::Refund,
            EntryType::CashOut,
            EntryType::Transfer,
            EntryType::Cancel,
        ] {
            assert!(w.ensure_accepts(entry_type).is_ok());
        }
    }

    #[test]
    fn test_frozen_policy() {
        let w = wallet(WalletStatus::Frozen, 0, false);
        assert!(w.ensure_accepts(EntryType::TopUp).is_ok());
        assert!(w.ensure_accepts(EntryType::Refund).is_ok());
        assert!(matches!(
            w.ensure_accepts(EntryType::Purchase),
            Err(Error::WalletFrozen(_))
        ));
        assert!(matches!(
            w.ensure_accepts(EntryType::CashOut),
            Err(Error::WalletFrozen(_))
        ));
    }

    #[test]
    fn test_closed_accepts_nothing() {
        let w = wallet(WalletStatus::Closed, 0, false);
        assert!(matches!(
            w.ensure_accepts(EntryType::TopUp),
            Err(Error::WalletClosed(_))
        ));
    }

    #[test]
    fn test_version_guard() {
        let w = wallet(WalletStatus::Active, 0, false);
        assert!(w.ensure_version(3).is_ok());
        assert!(matches!(
            w.ensure_version(2),
            Err(Error::VersionConflict {
                expected: 2,
                current: 3
            })
        ));
    }

    #[test]
    fn test_negative_balance_policy() {
        let strict = wallet(WalletStatus::Active, 500, false);
        assert_eq!(
            strict.projected_balance(Money::from_minor(-300)).unwrap(),
            Money::from_minor(200)
        );
        assert!(matches!(
            strict.projected_balance(Money::from_minor(-800)),
            Err(Error::InsufficientBalance { .. })
        ));

        let lenient = wallet(WalletStatus::Active, 500, true);
        assert_eq!(
            lenient.projected_balance(Money::from_minor(-800)).unwrap(),
            Money::from_minor(-300)
        );
    }

    #[test]
    fn test_amount_sign_rules() {
        assert!(validate_amount(EntryType::TopUp, Money::from_minor(100)).is_ok());
        assert!(validate_amount(EntryType::TopUp, Money::from_minor(-100)).is_err());
        assert!(validate_amount(EntryType::Purchase, Money::from_minor(-100)).is_ok());
        assert!(validate_amount(EntryType::Purchase, Money::from_minor(100)).is_err());
        assert!(validate_amount(EntryType::Cancel, Money::from_minor(-100)).is_ok());
        assert!(validate_amount(EntryType::Refund, Money::ZERO).is_err());
    }
}
