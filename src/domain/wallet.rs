use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, MinorUnits};

pub type WalletId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Frozen by an administrator; balance is kept but cannot move
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-owner, per-currency balance. Accounts are created lazily on first
/// credit and are never deleted, only suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    pub id: WalletId,
    pub owner_id: String,
    pub currency: Currency,
    /// Spendable balance in minor units
    pub balance: MinorUnits,
    pub status: AccountStatus,
    /// Optimistic concurrency token, bumped on every balance change
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn new(owner_id: impl Into<String>, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            currency,
            balance: 0,
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.status == AccountStatus::Suspended
    }

    /// Returns the balance after applying `delta`. Debits may not leave less
    /// than `floor`; credits are only refused when the balance cannot hold them.
    pub fn balance_after(
        &self,
        delta: MinorUnits,
        floor: MinorUnits,
    ) -> Result<MinorUnits, BalanceError> {
        let next = self
            .balance
            .checked_add(delta)
            .ok_or(BalanceError::Overflow)?;
        if delta < 0 && next < floor {
            return Err(BalanceError::BelowFloor { floor });
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("balance would fall below {floor}")]
    BelowFloor { floor: MinorUnits },
    #[error("balance would exceed the largest representable amount")]
    Overflow,
}

/// Spendable and escrow-held amounts of one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: WalletAccount,
    /// Amount this account has placed in escrow that is not yet resolved
    pub held_in_escrow: MinorUnits,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(balance: MinorUnits) -> WalletAccount {
        let mut account = WalletAccount::new("alice", Currency::new("GNF").unwrap());
        account.balance = balance;
        account
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [AccountStatus::Active, AccountStatus::Suspended] {
            assert_eq!(AccountStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::from_str("closed"), None);
    }

    #[test]
    fn test_new_account_is_empty_and_active() {
        let account = account_with(0);
        assert_eq!(account.balance, 0);
        assert_eq!(account.version, 0);
        assert!(!account.is_suspended());
    }

    #[test]
    fn test_balance_after_respects_floor() {
        let account = account_with(12000);
        assert_eq!(account.balance_after(-12000, 0), Ok(0));
        assert_eq!(
            account.balance_after(-20000, 0),
            Err(BalanceError::BelowFloor { floor: 0 })
        );
        assert_eq!(
            account.balance_after(-2000, 11000),
            Err(BalanceError::BelowFloor { floor: 11000 })
        );
    }

    #[test]
    fn test_credit_is_never_refused() {
        // An account already below its floor can still be credited
        let account = account_with(0);
        assert_eq!(account.balance_after(500, 1000), Ok(500));
    }

    #[test]
    fn test_overflowing_credit_is_not_a_shortage() {
        let account = account_with(MinorUnits::MAX);
        assert_eq!(account.balance_after(1, 0), Err(BalanceError::Overflow));
        assert_eq!(account.balance_after(-1, 0), Ok(MinorUnits::MAX - 1));
    }
}
