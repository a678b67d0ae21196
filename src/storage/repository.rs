use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Currency, LedgerTransaction, MinorUnits, TransactionId, TransactionStatus, TransactionType,
    WalletId,
};

use super::{AuditRecorder, MIGRATION_001_INITIAL, WalletStore};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Storage outcomes that callers must branch on. Everything else is plumbing
/// and travels as `Other`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("insufficient funds in wallet {wallet}: balance {balance}, required {required}")]
    InsufficientFunds {
        wallet: WalletId,
        balance: MinorUnits,
        required: MinorUnits,
    },

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("wallet {0} is suspended")]
    Suspended(WalletId),

    #[error("balance of wallet {0} would overflow")]
    Overflow(WalletId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classify a sqlx error: lock contention becomes a retryable conflict and
/// unique violations become `Duplicate`.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate(db_err.message().to_string());
            }
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                return StoreError::Conflict(format!("{}: database is busy", context));
            }
        }
        StoreError::Other(anyhow::Error::new(err).context(context))
    }
}

/// Repository owning the connection pool and the ledger/escrow tables.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the SQLite database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, max_connections: u32) -> Result<Self> {
        let repo = Self::connect(database_url, max_connections, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn wallets(&self) -> WalletStore {
        WalletStore::new(self.pool.clone())
    }

    pub fn audit(&self) -> AuditRecorder {
        AuditRecorder::new(self.pool.clone())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    pub async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Ledger transactions
    // ========================

    /// Insert a new (pending) ledger transaction. A reused reference yields
    /// `StoreError::Duplicate`.
    pub async fn insert_transaction(&self, tx: &LedgerTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_transactions (id, reference, tx_type, sender_wallet_id, receiver_wallet_id, amount, currency, status, description, metadata, sender_balance_after, receiver_balance_after, failure_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.id.to_string())
        .bind(&tx.reference)
        .bind(tx.tx_type.as_str())
        .bind(tx.sender.map(|id| id.to_string()))
        .bind(tx.receiver.map(|id| id.to_string()))
        .bind(tx.amount)
        .bind(tx.currency.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(tx.metadata.to_string())
        .bind(tx.sender_balance_after)
        .bind(tx.receiver_balance_after)
        .bind(&tx.failure_reason)
        .bind(format_timestamp(&tx.created_at))
        .bind(format_timestamp(&tx.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save ledger transaction"))?;
        Ok(())
    }

    /// Persist the completed form of a pending transaction inside the unit of
    /// work that applied its balance changes.
    pub async fn complete_transaction(
        conn: &mut SqliteConnection,
        completed: &LedgerTransaction,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET status = ?, sender_balance_after = ?, receiver_balance_after = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(completed.status.as_str())
        .bind(completed.sender_balance_after)
        .bind(completed.receiver_balance_after)
        .bind(format_timestamp(&completed.updated_at))
        .bind(completed.id.to_string())
        .execute(conn)
        .await
        .map_err(db_error("Failed to complete ledger transaction"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "ledger transaction {} is no longer pending",
                completed.id
            )));
        }
        Ok(())
    }

    /// Mark a pending transaction failed. Final transactions are left untouched.
    pub async fn fail_transaction(&self, id: TransactionId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET status = 'failed', failure_reason = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(format_timestamp(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to mark ledger transaction failed")?;
        Ok(())
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_transactions WHERE id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch ledger transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    pub async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_transactions WHERE reference = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch ledger transaction by reference")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// List transactions, newest first, optionally for one wallet.
    pub async fn list_transactions(
        &self,
        wallet_id: Option<WalletId>,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerTransaction>> {
        let mut query = format!("SELECT {} FROM ledger_transactions", TRANSACTION_COLUMNS);
        let wallet_id_str = wallet_id.map(|id| id.to_string());

        if wallet_id.is_some() {
            query.push_str(" WHERE sender_wallet_id = ? OR receiver_wallet_id = ?");
        }
        query.push_str(" ORDER BY created_at DESC, id");
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(ref wid) = wallet_id_str {
            sql_query = sql_query.bind(wid).bind(wid);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list ledger transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<LedgerTransaction> {
        let tx_type_str: String = row.get("tx_type");
        let status_str: String = row.get("status");
        let currency_str: String = row.get("currency");
        let metadata_str: String = row.get("metadata");

        Ok(LedgerTransaction {
            id: parse_uuid(row, "id")?,
            reference: row.get("reference"),
            tx_type: TransactionType::from_str(&tx_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", tx_type_str))?,
            sender: parse_opt_uuid(row, "sender_wallet_id")?,
            receiver: parse_opt_uuid(row, "receiver_wallet_id")?,
            amount: row.get("amount"),
            currency: Currency::new(&currency_str).context("Invalid currency")?,
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            description: row.get("description"),
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            sender_balance_after: row.get("sender_balance_after"),
            receiver_balance_after: row.get("receiver_balance_after"),
            failure_reason: row.get("failure_reason"),
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}

const TRANSACTION_COLUMNS: &str = "id, reference, tx_type, sender_wallet_id, receiver_wallet_id, amount, currency, status, description, metadata, sender_balance_after, receiver_balance_after, failure_reason, created_at, updated_at";

/// Fixed-width UTC timestamps so stored values sort chronologically as text.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid UUID in column {}", column))
}

pub(crate) fn parse_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.get(column);
    value
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid UUID in column {}", column))
}

pub(crate) fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid timestamp in column {}", column))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_opt_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column);
    Ok(value
        .map(|s| DateTime::parse_from_rfc3339(&s))
        .transpose()
        .with_context(|| format!("Invalid timestamp in column {}", column))?
        .map(|dt| dt.with_timezone(&Utc)))
}
