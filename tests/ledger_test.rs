mod common;

use anyhow::Result;
use common::*;
use escrow_ledger::application::ErrorKind;
use escrow_ledger::domain::{EventKind, TransactionStatus, TransactionType};

#[tokio::test]
async fn test_deposit_is_applied_once_per_reference() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 10000).await?;

    let first = service.deposit("A", 5000, &gnf(), "DEP1").await?;
    assert_eq!(first.transaction.status, TransactionStatus::Completed);
    assert_eq!(first.receiver_balance, Some(15000));
    assert_eq!(balance_of(&service, "A").await?, 15000);

    let replay = service.deposit("A", 5000, &gnf(), "DEP1").await?;
    assert_eq!(replay.transaction.id, first.transaction.id);
    assert_eq!(replay.receiver_balance, Some(15000));
    assert_eq!(replay.transaction.updated_at, first.transaction.updated_at);
    assert_eq!(balance_of(&service, "A").await?, 15000);

    Ok(())
}

#[tokio::test]
async fn test_deposit_creates_account_lazily() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert_eq!(
        service.get_balance("newcomer", &gnf()).await.unwrap_err().kind(),
        ErrorKind::AccountNotFound
    );

    service.deposit("newcomer", 2500, &gnf(), "DEP-NEW").await?;
    assert_eq!(balance_of(&service, "newcomer").await?, 2500);

    // A second currency is a separate account
    service.deposit("newcomer", 700, &eur(), "DEP-NEW-EUR").await?;
    assert_eq!(service.get_balance("newcomer", &eur()).await?, 700);
    assert_eq!(balance_of(&service, "newcomer").await?, 2500);

    Ok(())
}

#[tokio::test]
async fn test_non_positive_amounts_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for amount in [0, -500] {
        let err = service
            .deposit("A", amount, &gnf(), &format!("BAD{}", amount))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    // Rejected before any record is created
    assert!(service.list_transactions(None, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transfer_to_new_receiver() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.deposit("A", 15000, &gnf(), "DEP-A").await?;

    let result = service
        .transfer(&transfer_request("A", "B", 3000, "TR1"))
        .await?;

    assert_eq!(result.transaction.status, TransactionStatus::Completed);
    assert_eq!(result.transaction.tx_type, TransactionType::Transfer);
    assert_eq!(result.sender_balance, Some(12000));
    assert_eq!(result.receiver_balance, Some(3000));
    assert_eq!(balance_of(&service, "A").await?, 12000);
    assert_eq!(balance_of(&service, "B").await?, 3000);

    Ok(())
}

#[tokio::test]
async fn test_transfer_conserves_money() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 9000).await?;
    fund(&service, "B", 1000).await?;

    for (i, amount) in [1, 250, 4000, 4749].into_iter().enumerate() {
        service
            .transfer(&transfer_request("A", "B", amount, &format!("TR-{}", i)))
            .await?;
        let a = balance_of(&service, "A").await?;
        let b = balance_of(&service, "B").await?;
        assert_eq!(a + b, 10000);
    }
    assert_eq!(balance_of(&service, "A").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_transfer_by_account_id() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 5000).await?;
    fund(&service, "B", 1).await?;
    let b = service.get_account("B", &gnf()).await?;

    service
        .transfer(&transfer_request("A", &b.id.to_string(), 2000, "TR-ID"))
        .await?;
    assert_eq!(balance_of(&service, "B").await?, 2001);

    // Unknown account ids are never created implicitly
    let err = service
        .transfer(&transfer_request("A", &uuid::Uuid::new_v4().to_string(), 100, "TR-GHOST"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    Ok(())
}

#[tokio::test]
async fn test_self_transfer_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 5000).await?;
    let a = service.get_account("A", &gnf()).await?;

    let err = service
        .transfer(&transfer_request("A", &a.id.to_string(), 100, "TR-SELF"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelfOperation);

    let err = service
        .transfer(&transfer_request("A", "A", 100, "TR-SELF2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelfOperation);
    assert_eq!(balance_of(&service, "A").await?, 5000);

    Ok(())
}

#[tokio::test]
async fn test_transfer_from_unknown_sender() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service
        .transfer(&transfer_request("nobody", "B", 100, "TR-NOBODY"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    let err = service
        .transfer(&transfer_request("  ", "B", 100, "TR-BLANK"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_insufficient_funds_leaves_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 12000).await?;

    let err = service
        .withdraw("A", 20000, &gnf(), "WD-BIG")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(balance_of(&service, "A").await?, 12000);

    // The attempt is recorded as failed and cannot be replayed into success
    let record = service.get_transaction_by_reference("WD-BIG").await?;
    assert_eq!(record.status, TransactionStatus::Failed);
    assert!(record.failure_reason.is_some());

    let retry = service
        .withdraw("A", 20000, &gnf(), "WD-BIG")
        .await
        .unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::ConcurrencyConflict);
    assert_eq!(balance_of(&service, "A").await?, 12000);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_rules() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 5000).await?;

    let err = service
        .withdraw("A", 999, &gnf(), "WD-SMALL")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service
        .withdraw("ghost", 2000, &gnf(), "WD-GHOST")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    let result = service.withdraw("A", 5000, &gnf(), "WD-ALL").await?;
    assert_eq!(result.sender_balance, Some(0));
    assert_eq!(result.receiver_balance, None);

    Ok(())
}

#[tokio::test]
async fn test_failed_transfer_leaves_both_accounts_untouched() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 1000).await?;
    fund(&service, "B", 500).await?;

    let err = service
        .transfer(&transfer_request("A", "B", 1001, "TR-OVER"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(balance_of(&service, "A").await?, 1000);
    assert_eq!(balance_of(&service, "B").await?, 500);

    Ok(())
}

#[tokio::test]
async fn test_credit_to_suspended_account_rolls_back_debit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 5000).await?;
    fund(&service, "B", 100).await?;
    service.suspend_account("B", &gnf(), "admin").await?;

    let err = service
        .transfer(&transfer_request("A", "B", 2000, "TR-SUSP"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(balance_of(&service, "A").await?, 5000);
    assert_eq!(balance_of(&service, "B").await?, 100);

    // Nothing was audited for the failed attempt
    let record = service.get_transaction_by_reference("TR-SUSP").await?;
    assert!(service.audit_trail(record.id).await?.is_empty());

    service.reactivate_account("B", &gnf(), "admin").await?;
    service
        .transfer(&transfer_request("A", "B", 2000, "TR-SUSP-2"))
        .await?;
    assert_eq!(balance_of(&service, "B").await?, 2100);

    Ok(())
}

#[tokio::test]
async fn test_events_are_emitted_after_completion() -> Result<()> {
    let (service, mut events, _temp) = test_service_with_events().await?;

    let deposit = service.deposit("A", 5000, &gnf(), "DEP-EV").await?;
    let transfer = service
        .transfer(&transfer_request("A", "B", 1500, "TR-EV"))
        .await?;
    // Replays and failures stay silent
    service.deposit("A", 5000, &gnf(), "DEP-EV").await?;
    let _ = service.withdraw("A", 99999, &gnf(), "WD-EV").await;

    let first = events.try_recv()?;
    assert_eq!(first.kind, EventKind::Deposit);
    assert_eq!(first.correlation_id, deposit.transaction.id);
    assert_eq!(first.amounts.amount, 5000);

    let second = events.try_recv()?;
    assert_eq!(second.kind, EventKind::Transfer);
    assert_eq!(second.correlation_id, transfer.transaction.id);
    assert_eq!(second.recipients, vec!["A".to_string(), "B".to_string()]);

    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_list_transactions_for_account() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.deposit("A", 5000, &gnf(), "L1").await?;
    service.deposit("C", 5000, &gnf(), "L2").await?;
    service
        .transfer(&transfer_request("A", "B", 1000, "L3"))
        .await?;

    let a = service.get_account("A", &gnf()).await?;
    let for_a = service.list_transactions(Some(a.id), None).await?;
    let refs: Vec<_> = for_a.iter().map(|tx| tx.reference.as_str()).collect();
    assert_eq!(refs.len(), 2);
    assert!(refs.contains(&"L1"));
    assert!(refs.contains(&"L3"));

    let limited = service.list_transactions(None, Some(2)).await?;
    assert_eq!(limited.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_reference_reused_for_different_operation_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "A", 10000).await?;
    let deposit = service.deposit("A", 5000, &gnf(), "REF1").await?;

    let err = service
        .withdraw("A", 2000, &gnf(), "REF1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service
        .deposit("B", 999999, &gnf(), "REF1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    // Nothing was created for the rejected request
    assert_eq!(
        service.get_account("B", &gnf()).await.unwrap_err().kind(),
        ErrorKind::AccountNotFound
    );

    let err = service
        .deposit("A", 5001, &gnf(), "REF1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service
        .transfer(&transfer_request("A", "C", 5000, "REF1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(balance_of(&service, "A").await?, 15000);

    // The genuine resubmission still replays, by owner or by account id
    let replay = service.deposit("A", 5000, &gnf(), "REF1").await?;
    assert_eq!(replay.transaction.id, deposit.transaction.id);
    let account = service.get_account("A", &gnf()).await?;
    let replay = service
        .deposit(&account.id.to_string(), 5000, &gnf(), "REF1")
        .await?;
    assert_eq!(replay.transaction.id, deposit.transaction.id);
    assert_eq!(balance_of(&service, "A").await?, 15000);

    Ok(())
}

#[tokio::test]
async fn test_overflowing_credit_is_a_validation_error() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.deposit("A", i64::MAX, &gnf(), "BIG1").await?;

    let err = service.deposit("A", 1, &gnf(), "BIG2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(balance_of(&service, "A").await?, i64::MAX);

    let record = service.get_transaction_by_reference("BIG2").await?;
    assert_eq!(record.status, TransactionStatus::Failed);

    // A transfer into a full account rolls the sender's debit back
    fund(&service, "B", 5000).await?;
    let err = service
        .transfer(&transfer_request("B", "A", 1000, "BIG3"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(balance_of(&service, "B").await?, 5000);

    let report = service.reconcile().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    Ok(())
}
