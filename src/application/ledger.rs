use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Currency, EventKind, LedgerEvent, LedgerTransaction, MinorUnits, TransactionResult,
    TransactionStatus, TransactionType, WalletAccount, WalletId,
};
use crate::storage::{Adjustment, Repository, StoreError, WalletStore};

use super::{AppError, NotificationDispatcher, retry_conflicts};

/// A transfer as submitted by a caller.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Sender owner id or account id
    pub sender: String,
    /// Receiver owner id or account id; an owner without an account gets one
    pub receiver: String,
    pub amount: MinorUnits,
    pub currency: Currency,
    pub description: Option<String>,
    pub reference: String,
}

/// The parts of an incoming request that must agree with an earlier record
/// under the same reference.
struct Submission<'a> {
    tx_type: TransactionType,
    sender: Option<&'a str>,
    receiver: Option<&'a str>,
    amount: MinorUnits,
    currency: &'a Currency,
}

/// Deposits, withdrawals and transfers with exactly-once application per reference.
pub struct LedgerTransactionService {
    repo: Repository,
    config: Arc<LedgerConfig>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl LedgerTransactionService {
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

    /// Credit `account`, creating it on first use.
    pub async fn deposit(
        &self,
        account: &str,
        amount: MinorUnits,
        currency: &Currency,
        reference: &str,
    ) -> Result<TransactionResult, AppError> {
        validate_amount(amount)?;
        validate_reference(reference)?;
        let submission = Submission {
            tx_type: TransactionType::Deposit,
            sender: None,
            receiver: Some(account),
            amount,
            currency,
        };
        if let Some(result) = self.replay(reference, &submission).await? {
            return Ok(result);
        }

        let wallet = self.resolve_account(account, currency, true).await?;
        let pending = LedgerTransaction::deposit(wallet.id, amount, currency.clone(), reference);
        self.start(&pending).await?;

        let outcome = retry_conflicts(self.config.retry_policy(), "deposit", || {
            self.apply(&pending, &wallet.owner_id)
        })
        .await;
        let result = self.finish(&pending, outcome).await?;

        info!(reference, account = %wallet.id, amount, %currency, "deposit completed");
        self.notifier.dispatch(
            LedgerEvent::new(EventKind::Deposit, pending.id, &wallet.owner_id, amount, currency.clone())
                .with_recipients([wallet.owner_id.clone()]),
        );
        Ok(result)
    }

    /// Debit `account`. The account must exist and hold at least `amount`.
    pub async fn withdraw(
        &self,
        account: &str,
        amount: MinorUnits,
        currency: &Currency,
        reference: &str,
    ) -> Result<TransactionResult, AppError> {
        validate_amount(amount)?;
        validate_reference(reference)?;
        if amount < self.config.min_withdrawal {
            return Err(AppError::Validation(format!(
                "withdrawal of {} is below the minimum of {}",
                amount, self.config.min_withdrawal
            )));
        }
        let submission = Submission {
            tx_type: TransactionType::Withdraw,
            sender: Some(account),
            receiver: None,
            amount,
            currency,
        };
        if let Some(result) = self.replay(reference, &submission).await? {
            return Ok(result);
        }

        let wallet = self.resolve_account(account, currency, false).await?;
        let pending = LedgerTransaction::withdraw(wallet.id, amount, currency.clone(), reference);
        self.start(&pending).await?;

        let outcome = retry_conflicts(self.config.retry_policy(), "withdraw", || {
            self.apply(&pending, &wallet.owner_id)
        })
        .await;
        let result = self.finish(&pending, outcome).await?;

        info!(reference, account = %wallet.id, amount, %currency, "withdrawal completed");
        self.notifier.dispatch(
            LedgerEvent::new(EventKind::Withdraw, pending.id, &wallet.owner_id, amount, currency.clone())
                .with_recipients([wallet.owner_id.clone()]),
        );
        Ok(result)
    }

    /// Move funds between two accounts as one unit: either both sides are
    /// applied or neither is.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransactionResult, AppError> {
        validate_amount(request.amount)?;
        validate_reference(&request.reference)?;
        let submission = Submission {
            tx_type: TransactionType::Transfer,
            sender: Some(request.sender.as_str()),
            receiver: Some(request.receiver.as_str()),
            amount: request.amount,
            currency: &request.currency,
        };
        if let Some(result) = self.replay(&request.reference, &submission).await? {
            return Ok(result);
        }

        let sender = self
            .resolve_account(&request.sender, &request.currency, false)
            .await?;
        let receiver = self
            .resolve_account(&request.receiver, &request.currency, true)
            .await?;
        if sender.id == receiver.id {
            return Err(AppError::SelfOperation(sender.id.to_string()));
        }

        let mut pending = LedgerTransaction::transfer(
            sender.id,
            receiver.id,
            request.amount,
            request.currency.clone(),
            &request.reference,
        );
        if let Some(description) = &request.description {
            pending = pending.with_description(description);
        }
        self.start(&pending).await?;

        let outcome = retry_conflicts(self.config.retry_policy(), "transfer", || {
            self.apply(&pending, &sender.owner_id)
        })
        .await;
        let result = self.finish(&pending, outcome).await?;

        info!(
            reference = %request.reference,
            sender = %sender.id,
            receiver = %receiver.id,
            amount = request.amount,
            currency = %request.currency,
            "transfer completed"
        );
        self.notifier.dispatch(
            LedgerEvent::new(
                EventKind::Transfer,
                pending.id,
                &sender.owner_id,
                request.amount,
                request.currency.clone(),
            )
            .with_recipients([sender.owner_id.clone(), receiver.owner_id.clone()]),
        );
        Ok(result)
    }

    /// Look up an account by id, or by owner within `currency`.
    ///
    /// Owner ids without an account yet are created when `create` is set;
    /// account ids must always exist.
    pub async fn resolve_account(
        &self,
        identifier: &str,
        currency: &Currency,
        create: bool,
    ) -> Result<WalletAccount, AppError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AppError::AccountNotFound("empty account identifier".to_string()));
        }

        let wallets = self.repo.wallets();
        if let Ok(id) = Uuid::parse_str(identifier) {
            let wallet = wallets
                .get(id)
                .await?
                .ok_or_else(|| AppError::AccountNotFound(identifier.to_string()))?;
            if &wallet.currency != currency {
                return Err(AppError::Validation(format!(
                    "account {} holds {}, not {}",
                    wallet.id, wallet.currency, currency
                )));
            }
            return Ok(wallet);
        }

        if create {
            Ok(wallets.create_if_absent(identifier, currency).await?)
        } else {
            wallets.find(identifier, currency).await?.ok_or_else(|| {
                AppError::AccountNotFound(format!("{} has no {} account", identifier, currency))
            })
        }
    }

    /// Result of an earlier call with the same reference, if it completed.
    ///
    /// A reference reused for a different operation is rejected; it never
    /// replays someone else's result.
    async fn replay(
        &self,
        reference: &str,
        submission: &Submission<'_>,
    ) -> Result<Option<TransactionResult>, AppError> {
        let Some(existing) = self.repo.get_transaction_by_reference(reference).await? else {
            return Ok(None);
        };

        let sender = self.lookup(submission.sender, submission.currency).await?;
        let receiver = self.lookup(submission.receiver, submission.currency).await?;
        if !existing.matches_request(
            submission.tx_type,
            sender,
            receiver,
            submission.amount,
            submission.currency,
        ) {
            return Err(AppError::Validation(format!(
                "reference {} already used for a different operation",
                reference
            )));
        }

        if !existing.is_completed() {
            return Err(AppError::ConcurrencyConflict(format!(
                "duplicate in progress: reference {} is {}",
                reference, existing.status
            )));
        }
        debug!(reference, id = %existing.id, "replaying completed transaction");
        Ok(Some(existing.into()))
    }

    /// Resolve an identifier without creating anything. Unknown accounts
    /// resolve to `None`.
    async fn lookup(
        &self,
        identifier: Option<&str>,
        currency: &Currency,
    ) -> Result<Option<WalletId>, AppError> {
        let Some(identifier) = identifier else {
            return Ok(None);
        };
        match self.resolve_account(identifier, currency, false).await {
            Ok(wallet) => Ok(Some(wallet.id)),
            Err(AppError::AccountNotFound(_) | AppError::Validation(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Record the pending transaction. Losing a race on the reference counts
    /// as a duplicate in progress.
    async fn start(&self, pending: &LedgerTransaction) -> Result<(), AppError> {
        match self.repo.insert_transaction(pending).await {
            Ok(()) => Ok(()),
            Err(StoreError::Duplicate(_)) => Err(AppError::ConcurrencyConflict(format!(
                "duplicate in progress: reference {}",
                pending.reference
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// One attempt at applying `pending`: every balance change plus the
    /// status change commit together or not at all.
    async fn apply(
        &self,
        pending: &LedgerTransaction,
        actor: &str,
    ) -> Result<LedgerTransaction, AppError> {
        let mut tx = self.repo.begin().await?;
        let mut completed = pending.clone();

        if let Some(sender) = pending.sender {
            let change = WalletStore::adjust(
                &mut *tx,
                &Adjustment::debit(sender, pending.amount, actor, pending.id),
            )
            .await?;
            completed.sender_balance_after = Some(change.balance);
        }
        if let Some(receiver) = pending.receiver {
            let change = WalletStore::adjust(
                &mut *tx,
                &Adjustment::credit(receiver, pending.amount, actor, pending.id),
            )
            .await?;
            completed.receiver_balance_after = Some(change.balance);
        }

        completed.status = TransactionStatus::Completed;
        completed.updated_at = Utc::now();
        Repository::complete_transaction(&mut *tx, &completed).await?;
        Repository::commit(tx).await?;
        Ok(completed)
    }

    /// Settle the pending row: on failure it is marked failed so the
    /// reference can never be applied later.
    async fn finish(
        &self,
        pending: &LedgerTransaction,
        outcome: Result<LedgerTransaction, AppError>,
    ) -> Result<TransactionResult, AppError> {
        match outcome {
            Ok(completed) => Ok(completed.into()),
            Err(err) => {
                warn!(reference = %pending.reference, kind = %err.kind(), error = %err, "transaction failed");
                if let Err(mark_err) = self.repo.fail_transaction(pending.id, &err.to_string()).await {
                    warn!(reference = %pending.reference, error = %mark_err, "could not mark transaction failed");
                }
                Err(err)
            }
        }
    }
}

fn validate_amount(amount: MinorUnits) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn validate_reference(reference: &str) -> Result<(), AppError> {
    if reference.trim().is_empty() {
        return Err(AppError::Validation("reference must not be empty".to_string()));
    }
    Ok(())
}
