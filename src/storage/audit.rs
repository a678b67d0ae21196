use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{AuditEntry, AuditTarget, MinorUnits, WalletId, actions};

use super::StoreError;
use super::repository::{db_error, format_timestamp, parse_opt_uuid, parse_timestamp, parse_uuid};

/// Filter for querying the audit log
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub target_type: Option<AuditTarget>,
    pub target_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<usize>,
}

/// Append-only audit log. The schema rejects updates and deletes.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: SqlitePool,
}

impl AuditRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append `entry` within the caller's unit of work and return its sequence number.
    pub async fn record(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, actor_id, target_type, target_id, correlation_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.action)
        .bind(&entry.actor_id)
        .bind(entry.target_type.as_str())
        .bind(&entry.target_id)
        .bind(entry.correlation_id.map(|id| id.to_string()))
        .bind(entry.metadata.to_string())
        .bind(format_timestamp(&entry.created_at))
        .fetch_one(conn)
        .await
        .map_err(db_error("Failed to append audit entry"))?;

        Ok(row.get("sequence"))
    }

    /// List audit entries in append order.
    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut query = String::from(
            "SELECT sequence, id, action, actor_id, target_type, target_id, correlation_id, metadata, created_at FROM audit_log WHERE 1=1",
        );

        let correlation_str = filter.correlation_id.map(|id| id.to_string());

        if filter.target_type.is_some() {
            query.push_str(" AND target_type = ?");
        }
        if filter.target_id.is_some() {
            query.push_str(" AND target_id = ?");
        }
        if filter.correlation_id.is_some() {
            query.push_str(" AND correlation_id = ?");
        }
        if filter.action.is_some() {
            query.push_str(" AND action = ?");
        }

        query.push_str(" ORDER BY sequence");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);

        if let Some(target_type) = filter.target_type {
            sql_query = sql_query.bind(target_type.as_str());
        }
        if let Some(ref target_id) = filter.target_id {
            sql_query = sql_query.bind(target_id);
        }
        if let Some(ref correlation) = correlation_str {
            sql_query = sql_query.bind(correlation);
        }
        if let Some(ref action) = filter.action {
            sql_query = sql_query.bind(action);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list audit entries")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Every entry caused by one ledger transaction or escrow.
    pub async fn for_correlation(&self, correlation_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.list(&AuditFilter {
            correlation_id: Some(correlation_id),
            ..Default::default()
        })
        .await
    }

    /// Sum of audited balance deltas per wallet, used for reconciliation.
    pub async fn wallet_deltas(&self) -> Result<HashMap<WalletId, MinorUnits>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, COALESCE(SUM(json_extract(metadata, '$.delta')), 0) AS total
            FROM audit_log
            WHERE target_type = 'wallet' AND action IN (?, ?)
            GROUP BY target_id
            "#,
        )
        .bind(actions::WALLET_CREDIT)
        .bind(actions::WALLET_DEBIT)
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum audited wallet deltas")?;

        let mut deltas = HashMap::new();
        for row in rows {
            let wallet_id = parse_uuid(&row, "target_id")?;
            let total: MinorUnits = row.get("total");
            deltas.insert(wallet_id, total);
        }
        Ok(deltas)
    }

    fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry> {
        let target_type_str: String = row.get("target_type");
        let metadata_str: String = row.get("metadata");

        Ok(AuditEntry {
            id: parse_uuid(row, "id")?,
            sequence: row.get("sequence"),
            action: row.get("action"),
            actor_id: row.get("actor_id"),
            target_type: AuditTarget::from_str(&target_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid audit target: {}", target_type_str))?,
            target_id: row.get("target_id"),
            correlation_id: parse_opt_uuid(row, "correlation_id")?,
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }
}
