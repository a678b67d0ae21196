// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use escrow_ledger::application::{
    ChannelNotifier, EscrowRequest, LedgerService, TransferRequest,
};
use escrow_ledger::config::LedgerConfig;
use escrow_ledger::domain::{CommissionRate, Currency, LedgerEvent, MinorUnits};
use escrow_ledger::storage::Repository;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const RESOLVER: &str = "ops";

/// Config used by most tests: one resolver, generous retries.
pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        max_retries: 20,
        retry_backoff_ms: 1,
        ..LedgerConfig::default()
    }
    .with_resolvers([RESOLVER])
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(test_config()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// Service whose outbound events land in the returned receiver.
pub async fn test_service_with_events()
-> Result<(LedgerService, UnboundedReceiver<LedgerEvent>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());
    let config = test_config();
    let repo = Repository::init(&url, config.max_connections).await?;
    let (notifier, receiver) = ChannelNotifier::new();
    let service = LedgerService::with_notifier(repo, config, Arc::new(notifier));
    Ok((service, receiver, temp_dir))
}

pub fn gnf() -> Currency {
    Currency::new("GNF").unwrap()
}

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub async fn balance_of(service: &LedgerService, owner: &str) -> Result<MinorUnits> {
    Ok(service.get_balance(owner, &gnf()).await?)
}

/// Fund `owner` with a GNF deposit under a throwaway reference.
pub async fn fund(service: &LedgerService, owner: &str, amount: MinorUnits) -> Result<()> {
    service
        .deposit(owner, amount, &gnf(), &format!("FUND-{}-{}", owner, uuid::Uuid::new_v4()))
        .await?;
    Ok(())
}

pub fn transfer_request(
    sender: &str,
    receiver: &str,
    amount: MinorUnits,
    reference: &str,
) -> TransferRequest {
    TransferRequest {
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        amount,
        currency: gnf(),
        description: None,
        reference: reference.to_string(),
    }
}

pub fn escrow_request(order: &str, payer: &str, payee: &str, amount: MinorUnits, percent: &str) -> EscrowRequest {
    EscrowRequest {
        order_id: order.to_string(),
        payer_id: payer.to_string(),
        payee_id: payee.to_string(),
        amount,
        currency: gnf(),
        commission_rate: CommissionRate::parse_percent(percent).unwrap(),
    }
}
