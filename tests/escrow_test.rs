mod common;

use anyhow::Result;
use common::*;
use escrow_ledger::application::ErrorKind;
use escrow_ledger::domain::{EscrowStatus, EventKind, actions};

#[tokio::test]
async fn test_create_holds_funds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;

    let escrow = service
        .escrow_create(&escrow_request("O1", "P", "Q", 4000, "2.5"))
        .await?;

    assert_eq!(escrow.status, EscrowStatus::Held);
    assert!(escrow.held_at.is_some());
    assert_eq!(escrow.commission_rate.bps(), 250);
    assert_eq!(balance_of(&service, "P").await?, 6000);

    let summary = service.account_summary("P", &gnf()).await?;
    assert_eq!(summary.account.balance, 6000);
    assert_eq!(summary.held_in_escrow, 4000);

    // Payee account exists but received nothing yet
    assert_eq!(balance_of(&service, "Q").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_release_splits_commission_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O1", "P", "Q", 4000, "2.5"))
        .await?;

    let released = service.escrow_release(escrow.id, RESOLVER, None).await?;
    assert_eq!(released.status, EscrowStatus::Released);
    assert_eq!(released.net_amount, Some(3900));
    assert_eq!(released.commission_amount, Some(100));
    assert_eq!(released.resolved_by.as_deref(), Some(RESOLVER));
    assert_eq!(balance_of(&service, "Q").await?, 3900);
    assert_eq!(balance_of(&service, "platform").await?, 100);

    let again = service.escrow_release(escrow.id, RESOLVER, None).await?;
    assert_eq!(again.id, released.id);
    assert_eq!(again.released_at, released.released_at);
    assert_eq!(again.net_amount, Some(3900));
    assert_eq!(balance_of(&service, "Q").await?, 3900);
    assert_eq!(balance_of(&service, "platform").await?, 100);

    let summary = service.account_summary("P", &gnf()).await?;
    assert_eq!(summary.held_in_escrow, 0);
    Ok(())
}

#[tokio::test]
async fn test_split_never_leaks() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 100_000).await?;

    for (i, (amount, percent)) in [(999, "2.5"), (1, "10"), (3333, "33.33"), (5000, "0"), (7, "100")]
        .into_iter()
        .enumerate()
    {
        let escrow = service
            .escrow_create(&escrow_request(&format!("SPLIT-{}", i), "P", "Q", amount, percent))
            .await?;
        let released = service.escrow_release(escrow.id, "P", None).await?;
        let split = released.split().unwrap();
        assert_eq!(split.net_amount + split.commission_amount, amount);
    }

    let report = service.reconcile().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    Ok(())
}

#[tokio::test]
async fn test_dispute_then_refund() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O2", "P", "Q", 4000, "2.5"))
        .await?;

    let disputed = service
        .escrow_dispute(escrow.id, "P", Some("item never arrived"))
        .await?;
    assert_eq!(disputed.status, EscrowStatus::Dispute);
    assert_eq!(disputed.dispute_reason.as_deref(), Some("item never arrived"));
    // Disputed funds stay held
    assert_eq!(service.account_summary("P", &gnf()).await?.held_in_escrow, 4000);

    let refunded = service.escrow_refund(escrow.id, RESOLVER, None).await?;
    assert_eq!(refunded.status, EscrowStatus::Refunded);
    assert_eq!(balance_of(&service, "P").await?, 10000);

    let err = service.escrow_release(escrow.id, RESOLVER, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    assert_eq!(balance_of(&service, "P").await?, 10000);
    assert_eq!(balance_of(&service, "Q").await?, 0);

    // Refunding twice is harmless
    let again = service.escrow_refund(escrow.id, RESOLVER, None).await?;
    assert_eq!(again.status, EscrowStatus::Refunded);
    assert_eq!(balance_of(&service, "P").await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_invalid_transitions() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O3", "P", "Q", 1000, "5"))
        .await?;
    service.escrow_release(escrow.id, "P", None).await?;

    let err = service.escrow_refund(escrow.id, RESOLVER, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

    let err = service.escrow_dispute(escrow.id, "P", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

    let err = service
        .escrow_request_release(escrow.id, "Q")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

    let other = service
        .escrow_create(&escrow_request("O4", "P", "Q", 1000, "5"))
        .await?;
    service.escrow_dispute(other.id, "Q", None).await?;
    let err = service.escrow_dispute(other.id, "P", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    Ok(())
}

#[tokio::test]
async fn test_permissions() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O5", "P", "Q", 2000, "2.5"))
        .await?;

    // The payee cannot pay themselves out, outsiders cannot touch the escrow
    for (actor, kind) in [("Q", "release"), ("mallory", "release"), ("P", "refund"), ("mallory", "dispute")] {
        let err = match kind {
            "release" => service.escrow_release(escrow.id, actor, None).await.unwrap_err(),
            "refund" => service.escrow_refund(escrow.id, actor, None).await.unwrap_err(),
            _ => service.escrow_dispute(escrow.id, actor, None).await.unwrap_err(),
        };
        assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{} {}", actor, kind);
    }
    let err = service
        .escrow_request_release(escrow.id, "P")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // Once disputed only a resolver may settle
    service.escrow_dispute(escrow.id, "Q", None).await?;
    let err = service.escrow_release(escrow.id, "P", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = service.escrow_refund(escrow.id, "Q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let current = service.get_escrow(escrow.id).await?;
    assert_eq!(current.status, EscrowStatus::Dispute);
    assert_eq!(balance_of(&service, "P").await?, 8000);
    assert_eq!(balance_of(&service, "Q").await?, 0);

    let released = service.escrow_release(escrow.id, RESOLVER, None).await?;
    assert_eq!(released.status, EscrowStatus::Released);
    assert_eq!(balance_of(&service, "Q").await?, 1950);
    Ok(())
}

#[tokio::test]
async fn test_payee_may_refund_held_escrow() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 3000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O6", "P", "Q", 3000, "0"))
        .await?;
    assert_eq!(balance_of(&service, "P").await?, 0);

    service.escrow_refund(escrow.id, "Q", None).await?;
    assert_eq!(balance_of(&service, "P").await?, 3000);
    Ok(())
}

#[tokio::test]
async fn test_create_requires_funds_and_persists_nothing_on_failure() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 1000).await?;

    let err = service
        .escrow_create(&escrow_request("O7", "P", "Q", 4000, "2.5"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(balance_of(&service, "P").await?, 1000);
    assert_eq!(
        service.get_escrow_by_order("O7").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let err = service
        .escrow_create(&escrow_request("O8", "nobody", "Q", 100, "0"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    let err = service
        .escrow_create(&escrow_request("O9", "P", "P", 100, "0"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelfOperation);

    let err = service
        .escrow_create(&escrow_request("O10", "P", "Q", 0, "0"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn test_one_escrow_per_order() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;

    let first = service
        .escrow_create(&escrow_request("O11", "P", "Q", 4000, "2.5"))
        .await?;
    let again = service
        .escrow_create(&escrow_request("O11", "P", "Q", 4000, "2.5"))
        .await?;
    assert_eq!(again.id, first.id);
    assert_eq!(balance_of(&service, "P").await?, 6000);

    let err = service
        .escrow_create(&escrow_request("O11", "P", "Q", 5000, "2.5"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(balance_of(&service, "P").await?, 6000);
    Ok(())
}

#[tokio::test]
async fn test_request_release_changes_nothing() -> Result<()> {
    let (service, mut events, _temp) = test_service_with_events().await?;
    fund(&service, "P", 5000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O12", "P", "Q", 2000, "2.5"))
        .await?;

    service.escrow_request_release(escrow.id, "Q").await?;
    let current = service.get_escrow(escrow.id).await?;
    assert_eq!(current.status, EscrowStatus::Held);
    assert_eq!(balance_of(&service, "Q").await?, 0);

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![EventKind::Deposit, EventKind::EscrowHeld, EventKind::EscrowReleaseRequested]
    );
    Ok(())
}

#[tokio::test]
async fn test_release_event_carries_split() -> Result<()> {
    let (service, mut events, _temp) = test_service_with_events().await?;
    fund(&service, "P", 5000).await?;
    let escrow = service
        .escrow_create(&escrow_request("O13", "P", "Q", 4000, "2.5"))
        .await?;
    service.escrow_release(escrow.id, RESOLVER, None).await?;
    service.escrow_release(escrow.id, RESOLVER, None).await?;

    let released: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| event.kind == EventKind::EscrowReleased)
        .collect();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].correlation_id, escrow.id);
    assert_eq!(released[0].amounts.net_amount, Some(3900));
    assert_eq!(released[0].amounts.commission_amount, Some(100));
    Ok(())
}

#[tokio::test]
async fn test_list_escrows_by_status() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    let a = service
        .escrow_create(&escrow_request("L1", "P", "Q", 1000, "0"))
        .await?;
    service
        .escrow_create(&escrow_request("L2", "P", "Q", 1000, "0"))
        .await?;
    service.escrow_release(a.id, "P", None).await?;

    assert_eq!(service.list_escrows(None).await?.len(), 2);
    let held = service.list_escrows(Some(EscrowStatus::Held)).await?;
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].order_id, "L2");
    assert_eq!(service.get_escrow_by_order("L1").await?.status, EscrowStatus::Released);
    Ok(())
}

#[tokio::test]
async fn test_refund_keeps_resolution_note() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 5000).await?;
    let escrow = service
        .escrow_create(&escrow_request("N1", "P", "Q", 2000, "0"))
        .await?;

    let refunded = service
        .escrow_refund(escrow.id, "Q", Some("order cancelled by seller"))
        .await?;
    assert_eq!(refunded.status, EscrowStatus::Refunded);
    assert_eq!(
        refunded.resolution_note.as_deref(),
        Some("order cancelled by seller")
    );

    let stored = service.get_escrow(escrow.id).await?;
    assert_eq!(stored.resolution_note, refunded.resolution_note);

    let trail = service.audit_trail(escrow.id).await?;
    let entry = trail
        .iter()
        .find(|e| e.action == actions::ESCROW_REFUNDED)
        .unwrap();
    assert_eq!(entry.metadata["note"], "order cancelled by seller");

    // A replay with a different note leaves the recorded one alone
    let again = service
        .escrow_refund(escrow.id, "Q", Some("something else"))
        .await?;
    assert_eq!(again.resolution_note.as_deref(), Some("order cancelled by seller"));
    Ok(())
}

#[tokio::test]
async fn test_release_from_dispute_keeps_resolution_note() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 5000).await?;
    let escrow = service
        .escrow_create(&escrow_request("N2", "P", "Q", 4000, "2.5"))
        .await?;
    service
        .escrow_dispute(escrow.id, "P", Some("item not received"))
        .await?;

    let released = service
        .escrow_release(escrow.id, RESOLVER, Some("tracking shows delivery"))
        .await?;
    assert_eq!(released.status, EscrowStatus::Released);
    assert_eq!(released.dispute_reason.as_deref(), Some("item not received"));
    assert_eq!(
        released.resolution_note.as_deref(),
        Some("tracking shows delivery")
    );
    assert_eq!(balance_of(&service, "Q").await?, 3900);

    let trail = service.audit_trail(escrow.id).await?;
    let entry = trail
        .iter()
        .find(|e| e.action == actions::ESCROW_RELEASED)
        .unwrap();
    assert_eq!(entry.metadata["note"], "tracking shows delivery");
    assert_eq!(entry.metadata["reason"], "item not received");
    Ok(())
}

#[tokio::test]
async fn test_resolution_without_note() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 5000).await?;
    let escrow = service
        .escrow_create(&escrow_request("N3", "P", "Q", 1000, "0"))
        .await?;

    let released = service.escrow_release(escrow.id, "P", None).await?;
    assert_eq!(released.resolution_note, None);

    let trail = service.audit_trail(escrow.id).await?;
    let entry = trail
        .iter()
        .find(|e| e.action == actions::ESCROW_RELEASED)
        .unwrap();
    assert!(entry.metadata.get("note").is_none());
    Ok(())
}

#[tokio::test]
async fn test_list_escrows_for_party() -> Result<()> {
    let (service, _temp) = test_service().await?;
    fund(&service, "P", 10000).await?;
    fund(&service, "R", 10000).await?;
    let a = service
        .escrow_create(&escrow_request("M1", "P", "Q", 1000, "0"))
        .await?;
    service
        .escrow_create(&escrow_request("M2", "R", "P", 1000, "0"))
        .await?;
    service
        .escrow_create(&escrow_request("M3", "R", "Q", 1000, "0"))
        .await?;
    service.escrow_release(a.id, "P", None).await?;

    let orders = |escrows: Vec<escrow_ledger::domain::EscrowTransaction>| {
        let mut ids: Vec<_> = escrows.into_iter().map(|e| e.order_id).collect();
        ids.sort();
        ids
    };

    // P pays in M1 and is paid in M2
    assert_eq!(orders(service.list_escrows_for("P", None).await?), vec!["M1", "M2"]);
    assert_eq!(orders(service.list_escrows_for("Q", None).await?), vec!["M1", "M3"]);
    assert_eq!(orders(service.list_escrows_for("R", None).await?), vec!["M2", "M3"]);

    assert_eq!(
        orders(service.list_escrows_for("P", Some(EscrowStatus::Held)).await?),
        vec!["M2"]
    );
    assert_eq!(
        orders(service.list_escrows_for("Q", Some(EscrowStatus::Released)).await?),
        vec!["M1"]
    );

    assert!(service.list_escrows_for("outsider", None).await?.is_empty());
    Ok(())
}
