use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    AccountStatus, AuditEntry, AuditTarget, BalanceError, Currency, MinorUnits, WalletAccount,
    WalletId, actions,
};

use super::repository::{db_error, format_timestamp, parse_timestamp, parse_uuid};
use super::{AuditRecorder, StoreError};

const WALLET_COLUMNS: &str = "id, owner_id, currency, balance, status, version, created_at, updated_at";

/// One balance mutation, applied atomically by [`WalletStore::adjust`].
#[derive(Debug, Clone)]
pub struct Adjustment<'a> {
    pub account: WalletId,
    /// Signed change in minor units
    pub delta: MinorUnits,
    /// Lowest balance a debit may leave behind
    pub floor: MinorUnits,
    pub actor: &'a str,
    /// Ledger transaction or escrow that caused this change
    pub correlation_id: Uuid,
}

impl<'a> Adjustment<'a> {
    pub fn credit(account: WalletId, amount: MinorUnits, actor: &'a str, correlation_id: Uuid) -> Self {
        Self {
            account,
            delta: amount,
            floor: 0,
            actor,
            correlation_id,
        }
    }

    pub fn debit(account: WalletId, amount: MinorUnits, actor: &'a str, correlation_id: Uuid) -> Self {
        Self {
            account,
            delta: -amount,
            floor: 0,
            actor,
            correlation_id,
        }
    }
}

/// Outcome of a successful adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub account: WalletId,
    pub previous: MinorUnits,
    pub balance: MinorUnits,
    pub version: i64,
}

/// Per-account balances. Balances only ever change through [`WalletStore::adjust`].
#[derive(Clone)]
pub struct WalletStore {
    pool: SqlitePool,
}

impl WalletStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_balance(&self, account: WalletId) -> Result<MinorUnits, StoreError> {
        self.get(account)
            .await?
            .map(|wallet| wallet.balance)
            .ok_or(StoreError::WalletNotFound(account))
    }

    pub async fn get(&self, id: WalletId) -> Result<Option<WalletAccount>> {
        let row = sqlx::query(&format!("SELECT {} FROM wallets WHERE id = ?", WALLET_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    /// Find the account an owner holds in `currency`.
    pub async fn find(&self, owner_id: &str, currency: &Currency) -> Result<Option<WalletAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE owner_id = ? AND currency = ?",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet by owner")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    /// Return the owner's account in `currency`, creating an empty one first if needed.
    pub async fn create_if_absent(
        &self,
        owner_id: &str,
        currency: &Currency,
    ) -> Result<WalletAccount, StoreError> {
        let wallet = WalletAccount::new(owner_id, currency.clone());
        let inserted = sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, currency, balance, status, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id, currency) DO NOTHING
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(&wallet.owner_id)
        .bind(wallet.currency.as_str())
        .bind(wallet.balance)
        .bind(wallet.status.as_str())
        .bind(wallet.version)
        .bind(format_timestamp(&wallet.created_at))
        .bind(format_timestamp(&wallet.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to create wallet"))?;

        if inserted.rows_affected() > 0 {
            debug!(owner = owner_id, %currency, wallet = %wallet.id, "created wallet");
        }

        self.find(owner_id, currency)
            .await?
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("wallet for {} vanished", owner_id)))
    }

    /// List wallets, optionally restricted to one owner.
    pub async fn list(&self, owner_id: Option<&str>) -> Result<Vec<WalletAccount>> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query(&format!(
                    "SELECT {} FROM wallets WHERE owner_id = ? ORDER BY currency",
                    WALLET_COLUMNS
                ))
                .bind(owner)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM wallets ORDER BY owner_id, currency",
                    WALLET_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list wallets")?;

        rows.iter().map(Self::row_to_wallet).collect()
    }

    /// Suspend or reactivate an account. The change is audited.
    pub async fn set_status(
        &self,
        id: WalletId,
        status: AccountStatus,
        actor: &str,
    ) -> Result<WalletAccount, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let result = sqlx::query("UPDATE wallets SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_timestamp(&Utc::now()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to update wallet status"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WalletNotFound(id));
        }

        let action = match status {
            AccountStatus::Active => actions::WALLET_REACTIVATED,
            AccountStatus::Suspended => actions::WALLET_SUSPENDED,
        };
        let entry = AuditEntry::new(action, actor, AuditTarget::Wallet, id).with_correlation(id);
        AuditRecorder::record(&mut *tx, &entry).await?;

        let wallet = Self::fetch(&mut *tx, id)
            .await?
            .ok_or(StoreError::WalletNotFound(id))?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit wallet status"))?;
        Ok(wallet)
    }

    /// The single balance mutation primitive.
    ///
    /// Reads balance and version, checks that a debit keeps the balance at or
    /// above `floor`, then writes the new balance guarded by the version it
    /// read. A version mismatch means another writer got there first and is
    /// reported as `StoreError::Conflict`; the caller retries. Exactly one
    /// audit entry is appended in the same unit of work.
    pub async fn adjust(
        conn: &mut SqliteConnection,
        adjustment: &Adjustment<'_>,
    ) -> Result<BalanceChange, StoreError> {
        let account = Self::fetch(&mut *conn, adjustment.account)
            .await?
            .ok_or(StoreError::WalletNotFound(adjustment.account))?;

        if account.is_suspended() {
            return Err(StoreError::Suspended(account.id));
        }

        let balance = match account.balance_after(adjustment.delta, adjustment.floor) {
            Ok(balance) => balance,
            Err(BalanceError::BelowFloor { .. }) => {
                return Err(StoreError::InsufficientFunds {
                    wallet: account.id,
                    balance: account.balance,
                    required: -adjustment.delta,
                });
            }
            Err(BalanceError::Overflow) => return Err(StoreError::Overflow(account.id)),
        };

        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(balance)
        .bind(format_timestamp(&Utc::now()))
        .bind(account.id.to_string())
        .bind(account.version)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to adjust wallet balance"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "wallet {} changed since version {}",
                account.id, account.version
            )));
        }

        let action = if adjustment.delta >= 0 {
            actions::WALLET_CREDIT
        } else {
            actions::WALLET_DEBIT
        };
        let entry = AuditEntry::new(action, adjustment.actor, AuditTarget::Wallet, account.id)
            .with_correlation(adjustment.correlation_id)
            .with_metadata(json!({
                "delta": adjustment.delta,
                "balance_before": account.balance,
                "balance_after": balance,
                "currency": account.currency,
            }));
        AuditRecorder::record(&mut *conn, &entry).await?;

        debug!(
            wallet = %account.id,
            delta = adjustment.delta,
            balance,
            version = account.version + 1,
            "adjusted wallet balance"
        );

        Ok(BalanceChange {
            account: account.id,
            previous: account.balance,
            balance,
            version: account.version + 1,
        })
    }

    pub(crate) async fn fetch(
        conn: &mut SqliteConnection,
        id: WalletId,
    ) -> Result<Option<WalletAccount>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM wallets WHERE id = ?", WALLET_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(conn)
            .await
            .map_err(db_error("Failed to fetch wallet"))?;

        Ok(row.as_ref().map(Self::row_to_wallet).transpose()?)
    }

    fn row_to_wallet(row: &SqliteRow) -> Result<WalletAccount> {
        let currency_str: String = row.get("currency");
        let status_str: String = row.get("status");

        Ok(WalletAccount {
            id: parse_uuid(row, "id")?,
            owner_id: row.get("owner_id"),
            currency: Currency::new(&currency_str).context("Invalid currency")?,
            balance: row.get("balance"),
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            version: row.get("version"),
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}
