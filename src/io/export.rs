use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{AccountSummary, AuditEntry, EscrowTransaction, LedgerTransaction};
use crate::storage::AuditFilter;

/// Full ledger snapshot for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<AccountSummary>,
    pub transactions: Vec<LedgerTransaction>,
    pub escrows: Vec<EscrowTransaction>,
    pub audit_log: Vec<AuditEntry>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export ledger transactions to CSV format, oldest first
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut transactions = self.service.list_transactions(None, None).await?;
        transactions.reverse();
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "reference",
            "type",
            "status",
            "sender_account",
            "receiver_account",
            "amount",
            "currency",
            "sender_balance_after",
            "receiver_balance_after",
            "description",
            "failure_reason",
            "created_at",
            "updated_at",
        ])?;

        for tx in &transactions {
            csv_writer.write_record([
                tx.id.to_string(),
                tx.reference.clone(),
                tx.tx_type.as_str().to_string(),
                tx.status.as_str().to_string(),
                tx.sender.map(|id| id.to_string()).unwrap_or_default(),
                tx.receiver.map(|id| id.to_string()).unwrap_or_default(),
                tx.amount.to_string(),
                tx.currency.to_string(),
                tx.sender_balance_after.map(|b| b.to_string()).unwrap_or_default(),
                tx.receiver_balance_after.map(|b| b.to_string()).unwrap_or_default(),
                tx.description.clone().unwrap_or_default(),
                tx.failure_reason.clone().unwrap_or_default(),
                tx.created_at.to_rfc3339(),
                tx.updated_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export balances to CSV format
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let summaries = self.service.balances(None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "account",
            "owner",
            "currency",
            "balance",
            "held_in_escrow",
            "status",
        ])?;

        for summary in &summaries {
            let account = &summary.account;
            csv_writer.write_record([
                account.id.to_string(),
                account.owner_id.clone(),
                account.currency.to_string(),
                account.balance.to_string(),
                summary.held_in_escrow.to_string(),
                account.status.as_str().to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(summaries.len())
    }

    /// Export the audit log to CSV format, in append order
    pub async fn export_audit_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let entries = self.service.audit_entries(&AuditFilter::default()).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "sequence",
            "id",
            "action",
            "actor",
            "target_type",
            "target_id",
            "correlation_id",
            "metadata",
            "created_at",
        ])?;

        for entry in &entries {
            csv_writer.write_record([
                entry.sequence.to_string(),
                entry.id.to_string(),
                entry.action.clone(),
                entry.actor_id.clone(),
                entry.target_type.as_str().to_string(),
                entry.target_id.clone(),
                entry.correlation_id.map(|id| id.to_string()).unwrap_or_default(),
                entry.metadata.to_string(),
                entry.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export ledger transactions as a JSON array, oldest first
    pub async fn export_transactions_json<W: Write>(&self, writer: W) -> Result<usize> {
        let mut transactions = self.service.list_transactions(None, None).await?;
        transactions.reverse();
        write_json(writer, &transactions)?;
        Ok(transactions.len())
    }

    /// Export balances as a JSON array
    pub async fn export_balances_json<W: Write>(&self, writer: W) -> Result<usize> {
        let summaries = self.service.balances(None).await?;
        write_json(writer, &summaries)?;
        Ok(summaries.len())
    }

    /// Export the audit log as a JSON array
    pub async fn export_audit_json<W: Write>(&self, writer: W) -> Result<usize> {
        let entries = self.service.audit_entries(&AuditFilter::default()).await?;
        write_json(writer, &entries)?;
        Ok(entries.len())
    }

    /// Export everything as one JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts: self.service.balances(None).await?,
            transactions: self.service.list_transactions(None, None).await?,
            escrows: self.service.list_escrows(None).await?,
            audit_log: self.service.audit_entries(&AuditFilter::default()).await?,
        };

        write_json(&mut writer, &snapshot)?;
        Ok(snapshot)
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
