use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::domain::{
    AuditEntry, AuditTarget, CommissionCalculator, CommissionRate, Currency, EscrowId,
    EscrowStatus, EscrowTransaction, EventKind, LedgerEvent, MinorUnits, actions,
};
use crate::storage::{Adjustment, AuditRecorder, Repository, StoreError, WalletStore};

use super::{AppError, NotificationDispatcher, retry_conflicts};

/// An escrow as submitted by a caller.
#[derive(Debug, Clone)]
pub struct EscrowRequest {
    pub order_id: String,
    pub payer_id: String,
    pub payee_id: String,
    pub amount: MinorUnits,
    pub currency: Currency,
    pub commission_rate: CommissionRate,
}

/// Owns the escrow state machine. Every transition is a status
/// compare-and-set committed together with its balance changes and audit entry.
pub struct EscrowEngine {
    repo: Repository,
    config: Arc<LedgerConfig>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl EscrowEngine {
    pub fn new(
        repo: Repository,
        config: Arc<LedgerConfig>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            repo,
            config,
            notifier,
        }
    }

    /// Hold `amount` from the payer's spendable balance against an order.
    ///
    /// One escrow exists per order: repeating an identical request returns
    /// the existing escrow, a conflicting one is rejected.
    pub async fn create(&self, request: &EscrowRequest) -> Result<EscrowTransaction, AppError> {
        if request.amount <= 0 {
            return Err(AppError::Validation(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        if request.order_id.trim().is_empty() {
            return Err(AppError::Validation("order id must not be empty".to_string()));
        }
        if request.payer_id == request.payee_id {
            return Err(AppError::SelfOperation(request.payer_id.clone()));
        }

        let wallets = self.repo.wallets();
        let payer = wallets
            .find(&request.payer_id, &request.currency)
            .await?
            .ok_or_else(|| {
                AppError::AccountNotFound(format!(
                    "{} has no {} account",
                    request.payer_id, request.currency
                ))
            })?;
        let payee = wallets
            .create_if_absent(&request.payee_id, &request.currency)
            .await?;

        let escrow = EscrowTransaction::new(
            &request.order_id,
            &request.payer_id,
            &request.payee_id,
            payer.id,
            payee.id,
            request.amount,
            request.currency.clone(),
            request.commission_rate,
        );

        let (held, created) = retry_conflicts(self.config.retry_policy(), "escrow.create", || {
            self.try_create(request, &escrow)
        })
        .await?;

        if created {
            info!(
                escrow = %held.id,
                order = %held.order_id,
                payer = %held.payer_id,
                amount = held.amount,
                currency = %held.currency,
                "escrow held"
            );
            self.notifier.dispatch(
                LedgerEvent::new(
                    EventKind::EscrowHeld,
                    held.id,
                    &held.payer_id,
                    held.amount,
                    held.currency.clone(),
                )
                .with_recipients([held.payer_id.clone(), held.payee_id.clone()]),
            );
        }
        Ok(held)
    }

    /// Signal that the payee considers the order fulfilled. Nothing moves;
    /// the payer or a resolver decides on release.
    pub async fn request_release(&self, escrow_id: EscrowId, actor: &str) -> Result<(), AppError> {
        let escrow = self.load(escrow_id).await?;
        if escrow.status != EscrowStatus::Held {
            return Err(invalid_transition(&escrow, EscrowStatus::Released));
        }
        if actor != escrow.payee_id && !self.config.is_resolver(actor) {
            return Err(AppError::PermissionDenied(format!(
                "{} may not request release of escrow {}",
                actor, escrow.id
            )));
        }

        retry_conflicts(self.config.retry_policy(), "escrow.request_release", || {
            self.record_release_request(&escrow, actor)
        })
        .await?;

        info!(escrow = %escrow.id, actor, "release requested");
        let mut recipients = vec![escrow.payer_id.clone()];
        recipients.extend(self.config.resolvers.iter().cloned());
        self.notifier.dispatch(
            LedgerEvent::new(
                EventKind::EscrowReleaseRequested,
                escrow.id,
                actor,
                escrow.amount,
                escrow.currency.clone(),
            )
            .with_recipients(recipients),
        );
        Ok(())
    }

    /// Pay the payee their net amount and the platform its commission.
    /// Releasing an already released escrow returns it unchanged.
    pub async fn release(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        let (released, applied) = retry_conflicts(self.config.retry_policy(), "escrow.release", || {
            self.try_release(escrow_id, actor, note)
        })
        .await?;

        if applied {
            let split = released.split().unwrap_or_else(|| {
                CommissionCalculator::compute(released.amount, released.commission_rate)
            });
            info!(
                escrow = %released.id,
                actor,
                net = split.net_amount,
                commission = split.commission_amount,
                "escrow released"
            );
            self.notifier.dispatch(
                LedgerEvent::new(
                    EventKind::EscrowReleased,
                    released.id,
                    actor,
                    released.amount,
                    released.currency.clone(),
                )
                .with_split(split)
                .with_recipients([released.payer_id.clone(), released.payee_id.clone()]),
            );
        }
        Ok(released)
    }

    /// Return the full amount to the payer.
    /// Refunding an already refunded escrow returns it unchanged.
    pub async fn refund(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        let (refunded, applied) = retry_conflicts(self.config.retry_policy(), "escrow.refund", || {
            self.try_refund(escrow_id, actor, note)
        })
        .await?;

        if applied {
            info!(escrow = %refunded.id, actor, amount = refunded.amount, "escrow refunded");
            self.notifier.dispatch(
                LedgerEvent::new(
                    EventKind::EscrowRefunded,
                    refunded.id,
                    actor,
                    refunded.amount,
                    refunded.currency.clone(),
                )
                .with_recipients([refunded.payer_id.clone(), refunded.payee_id.clone()]),
            );
        }
        Ok(refunded)
    }

    /// Freeze the escrow until a resolver releases or refunds it.
    pub async fn dispute(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        let disputed = retry_conflicts(self.config.retry_policy(), "escrow.dispute", || {
            self.try_dispute(escrow_id, actor, reason)
        })
        .await?;

        info!(escrow = %disputed.id, actor, reason = ?disputed.dispute_reason, "escrow disputed");
        let mut recipients = vec![disputed.payer_id.clone(), disputed.payee_id.clone()];
        recipients.extend(self.config.resolvers.iter().cloned());
        self.notifier.dispatch(
            LedgerEvent::new(
                EventKind::EscrowDisputed,
                disputed.id,
                actor,
                disputed.amount,
                disputed.currency.clone(),
            )
            .with_recipients(recipients),
        );
        Ok(disputed)
    }

    async fn load(&self, escrow_id: EscrowId) -> Result<EscrowTransaction, AppError> {
        self.repo
            .get_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))
    }

    async fn record_release_request(
        &self,
        escrow: &EscrowTransaction,
        actor: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let entry = AuditEntry::new(actions::ESCROW_RELEASE_REQUESTED, actor, AuditTarget::Escrow, escrow.id)
            .with_correlation(escrow.id)
            .with_metadata(json!({ "status": escrow.status }));
        AuditRecorder::record(&mut *tx, &entry).await?;
        Repository::commit(tx).await?;
        Ok(())
    }

    /// Returns the escrow and whether this call created it.
    async fn try_create(
        &self,
        request: &EscrowRequest,
        escrow: &EscrowTransaction,
    ) -> Result<(EscrowTransaction, bool), AppError> {
        if let Some(existing) = self.repo.get_escrow_by_order(&request.order_id).await? {
            if existing.matches_request(
                &request.payer_id,
                &request.payee_id,
                request.amount,
                &request.currency,
                request.commission_rate,
            ) {
                debug!(escrow = %existing.id, order = %existing.order_id, "escrow already exists for order");
                return Ok((existing, false));
            }
            return Err(AppError::Validation(format!(
                "order {} already has a different escrow",
                request.order_id
            )));
        }

        let mut tx = self.repo.begin().await?;
        match Repository::insert_escrow(&mut *tx, escrow).await {
            Err(StoreError::Duplicate(msg)) => {
                return Err(AppError::ConcurrencyConflict(format!(
                    "escrow for order {} created concurrently: {}",
                    request.order_id, msg
                )));
            }
            other => other?,
        }

        WalletStore::adjust(
            &mut *tx,
            &Adjustment::debit(escrow.payer_wallet, escrow.amount, &escrow.payer_id, escrow.id),
        )
        .await?;

        let mut held = escrow.clone();
        let now = Utc::now();
        held.status = EscrowStatus::Held;
        held.held_at = Some(now);
        held.updated_at = now;
        self.transition(&mut tx, escrow.status, &held, actions::ESCROW_HELD, &escrow.payer_id)
            .await?;

        Repository::commit(tx).await?;
        Ok((held, true))
    }

    async fn try_release(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<(EscrowTransaction, bool), AppError> {
        let escrow = self.load(escrow_id).await?;
        if escrow.status == EscrowStatus::Released {
            debug!(escrow = %escrow.id, "escrow already released");
            return Ok((escrow, false));
        }
        if !escrow.status.can_transition_to(EscrowStatus::Released) {
            return Err(invalid_transition(&escrow, EscrowStatus::Released));
        }
        let allowed = match escrow.status {
            EscrowStatus::Held => self.config.is_resolver(actor) || actor == escrow.payer_id,
            _ => self.config.is_resolver(actor),
        };
        if !allowed {
            return Err(AppError::PermissionDenied(format!(
                "{} may not release escrow {} while {}",
                actor, escrow.id, escrow.status
            )));
        }

        let split = CommissionCalculator::compute(escrow.amount, escrow.commission_rate);
        let platform = self
            .repo
            .wallets()
            .create_if_absent(&self.config.platform_owner, &escrow.currency)
            .await?;

        let mut tx = self.repo.begin().await?;
        let mut released = escrow.clone();
        let now = Utc::now();
        released.status = EscrowStatus::Released;
        released.net_amount = Some(split.net_amount);
        released.commission_amount = Some(split.commission_amount);
        released.resolved_by = Some(actor.to_string());
        released.resolution_note = note.map(str::to_string);
        released.released_at = Some(now);
        released.updated_at = now;
        self.transition(&mut tx, escrow.status, &released, actions::ESCROW_RELEASED, actor)
            .await?;

        if split.net_amount > 0 {
            WalletStore::adjust(
                &mut *tx,
                &Adjustment::credit(escrow.payee_wallet, split.net_amount, actor, escrow.id),
            )
            .await?;
        }
        if split.commission_amount > 0 {
            WalletStore::adjust(
                &mut *tx,
                &Adjustment::credit(platform.id, split.commission_amount, actor, escrow.id),
            )
            .await?;
        }

        Repository::commit(tx).await?;
        Ok((released, true))
    }

    async fn try_refund(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<(EscrowTransaction, bool), AppError> {
        let escrow = self.load(escrow_id).await?;
        if escrow.status == EscrowStatus::Refunded {
            debug!(escrow = %escrow.id, "escrow already refunded");
            return Ok((escrow, false));
        }
        if !escrow.status.can_transition_to(EscrowStatus::Refunded) {
            return Err(invalid_transition(&escrow, EscrowStatus::Refunded));
        }
        let allowed = match escrow.status {
            EscrowStatus::Dispute => self.config.is_resolver(actor),
            _ => self.config.is_resolver(actor) || actor == escrow.payee_id,
        };
        if !allowed {
            return Err(AppError::PermissionDenied(format!(
                "{} may not refund escrow {} while {}",
                actor, escrow.id, escrow.status
            )));
        }

        let mut tx = self.repo.begin().await?;
        let mut refunded = escrow.clone();
        let now = Utc::now();
        refunded.status = EscrowStatus::Refunded;
        refunded.resolved_by = Some(actor.to_string());
        refunded.resolution_note = note.map(str::to_string);
        refunded.refunded_at = Some(now);
        refunded.updated_at = now;
        self.transition(&mut tx, escrow.status, &refunded, actions::ESCROW_REFUNDED, actor)
            .await?;

        // a pending escrow never took the payer's funds
        if escrow.status.holds_funds() {
            WalletStore::adjust(
                &mut *tx,
                &Adjustment::credit(escrow.payer_wallet, escrow.amount, actor, escrow.id),
            )
            .await?;
        }

        Repository::commit(tx).await?;
        Ok((refunded, true))
    }

    async fn try_dispute(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        let escrow = self.load(escrow_id).await?;
        if !escrow.status.can_transition_to(EscrowStatus::Dispute) {
            return Err(invalid_transition(&escrow, EscrowStatus::Dispute));
        }
        if actor != escrow.payer_id && actor != escrow.payee_id && !self.config.is_resolver(actor) {
            return Err(AppError::PermissionDenied(format!(
                "{} is not a party to escrow {}",
                actor, escrow.id
            )));
        }

        let mut tx = self.repo.begin().await?;
        let mut disputed = escrow.clone();
        let now = Utc::now();
        disputed.status = EscrowStatus::Dispute;
        disputed.dispute_reason = reason.map(str::to_string);
        disputed.disputed_at = Some(now);
        disputed.updated_at = now;
        self.transition(&mut tx, escrow.status, &disputed, actions::ESCROW_DISPUTED, actor)
            .await?;

        Repository::commit(tx).await?;
        Ok(disputed)
    }

    /// Compare-and-set the status and append the transition's audit entry.
    async fn transition(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        expected: EscrowStatus,
        next: &EscrowTransaction,
        action: &str,
        actor: &str,
    ) -> Result<(), AppError> {
        if !Repository::compare_and_set_escrow(&mut **tx, expected, next).await? {
            return Err(AppError::ConcurrencyConflict(format!(
                "escrow {} is no longer {}",
                next.id, expected
            )));
        }

        let mut metadata = json!({
            "from": expected,
            "to": next.status,
            "amount": next.amount,
            "currency": next.currency,
        });
        if let Some(split) = next.split() {
            metadata["net_amount"] = json!(split.net_amount);
            metadata["commission_amount"] = json!(split.commission_amount);
        }
        if let Some(reason) = &next.dispute_reason {
            metadata["reason"] = json!(reason);
        }
        if let Some(note) = &next.resolution_note {
            metadata["note"] = json!(note);
        }

        let entry = AuditEntry::new(action, actor, AuditTarget::Escrow, next.id)
            .with_correlation(next.id)
            .with_metadata(metadata);
        AuditRecorder::record(&mut **tx, &entry).await?;
        Ok(())
    }
}

fn invalid_transition(escrow: &EscrowTransaction, to: EscrowStatus) -> AppError {
    AppError::InvalidStateTransition {
        escrow: escrow.id.to_string(),
        from: escrow.status,
        to,
    }
}
