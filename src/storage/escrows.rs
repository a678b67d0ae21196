use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{
    CommissionRate, Currency, EscrowId, EscrowStatus, EscrowTransaction, MinorUnits, WalletId,
};

use super::repository::{
    db_error, format_timestamp, parse_opt_timestamp, parse_timestamp, parse_uuid,
};
use super::{Repository, StoreError};

const ESCROW_COLUMNS: &str = "id, order_id, payer_id, payee_id, payer_wallet_id, payee_wallet_id, amount, currency, commission_bps, commission_amount, net_amount, status, dispute_reason, resolved_by, resolution_note, created_at, updated_at, held_at, disputed_at, released_at, refunded_at";

impl Repository {
    // ========================
    // Escrows
    // ========================

    /// Insert a new escrow. A second escrow for the same order yields `StoreError::Duplicate`.
    pub async fn insert_escrow(
        conn: &mut SqliteConnection,
        escrow: &EscrowTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO escrows ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ESCROW_COLUMNS
        ))
        .bind(escrow.id.to_string())
        .bind(&escrow.order_id)
        .bind(&escrow.payer_id)
        .bind(&escrow.payee_id)
        .bind(escrow.payer_wallet.to_string())
        .bind(escrow.payee_wallet.to_string())
        .bind(escrow.amount)
        .bind(escrow.currency.as_str())
        .bind(escrow.commission_rate.bps())
        .bind(escrow.commission_amount)
        .bind(escrow.net_amount)
        .bind(escrow.status.as_str())
        .bind(&escrow.dispute_reason)
        .bind(&escrow.resolved_by)
        .bind(&escrow.resolution_note)
        .bind(format_timestamp(&escrow.created_at))
        .bind(format_timestamp(&escrow.updated_at))
        .bind(escrow.held_at.as_ref().map(format_timestamp))
        .bind(escrow.disputed_at.as_ref().map(format_timestamp))
        .bind(escrow.released_at.as_ref().map(format_timestamp))
        .bind(escrow.refunded_at.as_ref().map(format_timestamp))
        .execute(conn)
        .await
        .map_err(db_error("Failed to save escrow"))?;
        Ok(())
    }

    /// Persist `next` only if the stored status still equals `expected`.
    /// Returns false when another writer moved the escrow first.
    pub async fn compare_and_set_escrow(
        conn: &mut SqliteConnection,
        expected: EscrowStatus,
        next: &EscrowTransaction,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE escrows
            SET status = ?, commission_amount = ?, net_amount = ?, dispute_reason = ?, resolved_by = ?,
                resolution_note = ?, updated_at = ?, held_at = ?, disputed_at = ?, released_at = ?, refunded_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.status.as_str())
        .bind(next.commission_amount)
        .bind(next.net_amount)
        .bind(&next.dispute_reason)
        .bind(&next.resolved_by)
        .bind(&next.resolution_note)
        .bind(format_timestamp(&next.updated_at))
        .bind(next.held_at.as_ref().map(format_timestamp))
        .bind(next.disputed_at.as_ref().map(format_timestamp))
        .bind(next.released_at.as_ref().map(format_timestamp))
        .bind(next.refunded_at.as_ref().map(format_timestamp))
        .bind(next.id.to_string())
        .bind(expected.as_str())
        .execute(conn)
        .await
        .map_err(db_error("Failed to update escrow status"))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_escrow(&self, id: EscrowId) -> Result<Option<EscrowTransaction>> {
        let row = sqlx::query(&format!("SELECT {} FROM escrows WHERE id = ?", ESCROW_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch escrow")?;

        row.as_ref().map(Self::row_to_escrow).transpose()
    }

    pub async fn get_escrow_by_order(&self, order_id: &str) -> Result<Option<EscrowTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM escrows WHERE order_id = ?",
            ESCROW_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch escrow by order")?;

        row.as_ref().map(Self::row_to_escrow).transpose()
    }

    /// List escrows, newest first, optionally filtered by status.
    pub async fn list_escrows(&self, status: Option<EscrowStatus>) -> Result<Vec<EscrowTransaction>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM escrows WHERE status = ? ORDER BY created_at DESC",
                    ESCROW_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM escrows ORDER BY created_at DESC",
                    ESCROW_COLUMNS
                ))
                .fetch_all(self.pool())
                .await
            }
        }
        .context("Failed to list escrows")?;

        rows.iter().map(Self::row_to_escrow).collect()
    }

    /// Escrows where `party` is the payer or the payee, newest first.
    pub async fn list_escrows_for(
        &self,
        party: &str,
        status: Option<EscrowStatus>,
    ) -> Result<Vec<EscrowTransaction>> {
        let mut query = format!(
            "SELECT {} FROM escrows WHERE (payer_id = ? OR payee_id = ?)",
            ESCROW_COLUMNS
        );
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut sql_query = sqlx::query(&query).bind(party).bind(party);
        if let Some(status) = status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to list escrows for party")?;

        rows.iter().map(Self::row_to_escrow).collect()
    }

    /// Amount a wallet currently has locked as payer in unresolved escrows.
    pub async fn held_amount_for(&self, wallet_id: WalletId) -> Result<MinorUnits> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM escrows
            WHERE payer_wallet_id = ? AND status IN ('held', 'dispute')
            "#,
        )
        .bind(wallet_id.to_string())
        .fetch_one(self.pool())
        .await
        .context("Failed to sum held escrow")?;

        Ok(row.get("total"))
    }

    fn row_to_escrow(row: &SqliteRow) -> Result<EscrowTransaction> {
        let currency_str: String = row.get("currency");
        let status_str: String = row.get("status");
        let bps: u32 = row.get("commission_bps");

        Ok(EscrowTransaction {
            id: parse_uuid(row, "id")?,
            order_id: row.get("order_id"),
            payer_id: row.get("payer_id"),
            payee_id: row.get("payee_id"),
            payer_wallet: parse_uuid(row, "payer_wallet_id")?,
            payee_wallet: parse_uuid(row, "payee_wallet_id")?,
            amount: row.get("amount"),
            currency: Currency::new(&currency_str).context("Invalid currency")?,
            commission_rate: CommissionRate::from_bps(bps).context("Invalid commission rate")?,
            commission_amount: row.get("commission_amount"),
            net_amount: row.get("net_amount"),
            status: EscrowStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid escrow status: {}", status_str))?,
            dispute_reason: row.get("dispute_reason"),
            resolved_by: row.get("resolved_by"),
            resolution_note: row.get("resolution_note"),
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
            held_at: parse_opt_timestamp(row, "held_at")?,
            disputed_at: parse_opt_timestamp(row, "disputed_at")?,
            released_at: parse_opt_timestamp(row, "released_at")?,
            refunded_at: parse_opt_timestamp(row, "refunded_at")?,
        })
    }
}
