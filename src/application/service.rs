use std::sync::Arc;

use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    AccountStatus, AccountSummary, AuditEntry, Currency, EscrowId, EscrowStatus,
    EscrowTransaction, LedgerTransaction, MinorUnits, ReconciliationReport, TransactionId,
    TransactionResult, WalletAccount, WalletId, build_reconciliation_report,
};
use crate::storage::{AuditFilter, Repository};

use super::{
    AppError, EscrowEngine, EscrowRequest, LedgerTransactionService, NotificationDispatcher,
    TracingNotifier, TransferRequest,
};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, embedding service).
pub struct LedgerService {
    repo: Repository,
    config: Arc<LedgerConfig>,
    ledger: LedgerTransactionService,
    escrow: EscrowEngine,
}

impl LedgerService {
    /// Create a service that logs its outbound events.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self::with_notifier(repo, config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        repo: Repository,
        config: LedgerConfig,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            ledger: LedgerTransactionService::new(repo.clone(), config.clone(), notifier.clone()),
            escrow: EscrowEngine::new(repo.clone(), config.clone(), notifier),
            repo,
            config,
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url, config.max_connections).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url, config.max_connections, false).await?;
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn ledger(&self) -> &LedgerTransactionService {
        &self.ledger
    }

    pub fn escrow(&self) -> &EscrowEngine {
        &self.escrow
    }

    pub async fn close(&self) {
        self.repo.close().await;
    }

    // ========================
    // Money movement
    // ========================

    pub async fn deposit(
        &self,
        account: &str,
        amount: MinorUnits,
        currency: &Currency,
        reference: &str,
    ) -> Result<TransactionResult, AppError> {
        self.ledger.deposit(account, amount, currency, reference).await
    }

    pub async fn withdraw(
        &self,
        account: &str,
        amount: MinorUnits,
        currency: &Currency,
        reference: &str,
    ) -> Result<TransactionResult, AppError> {
        self.ledger.withdraw(account, amount, currency, reference).await
    }

    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransactionResult, AppError> {
        self.ledger.transfer(request).await
    }

    // ========================
    // Escrow
    // ========================

    pub async fn escrow_create(&self, request: &EscrowRequest) -> Result<EscrowTransaction, AppError> {
        self.escrow.create(request).await
    }

    pub async fn escrow_request_release(&self, escrow_id: EscrowId, actor: &str) -> Result<(), AppError> {
        self.escrow.request_release(escrow_id, actor).await
    }

    pub async fn escrow_release(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        self.escrow.release(escrow_id, actor, note).await
    }

    pub async fn escrow_refund(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        note: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        self.escrow.refund(escrow_id, actor, note).await
    }

    pub async fn escrow_dispute(
        &self,
        escrow_id: EscrowId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, AppError> {
        self.escrow.dispute(escrow_id, actor, reason).await
    }

    pub async fn get_escrow(&self, escrow_id: EscrowId) -> Result<EscrowTransaction, AppError> {
        self.repo
            .get_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("escrow {}", escrow_id)))
    }

    pub async fn get_escrow_by_order(&self, order_id: &str) -> Result<EscrowTransaction, AppError> {
        self.repo
            .get_escrow_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("escrow for order {}", order_id)))
    }

    pub async fn list_escrows(
        &self,
        status: Option<EscrowStatus>,
    ) -> Result<Vec<EscrowTransaction>, AppError> {
        Ok(self.repo.list_escrows(status).await?)
    }

    /// Escrows in which `party` pays or is paid.
    pub async fn list_escrows_for(
        &self,
        party: &str,
        status: Option<EscrowStatus>,
    ) -> Result<Vec<EscrowTransaction>, AppError> {
        Ok(self.repo.list_escrows_for(party, status).await?)
    }

    // ========================
    // Accounts
    // ========================

    /// Resolve an account by id, or by owner within `currency`.
    pub async fn get_account(
        &self,
        identifier: &str,
        currency: &Currency,
    ) -> Result<WalletAccount, AppError> {
        self.ledger.resolve_account(identifier, currency, false).await
    }

    pub async fn get_balance(&self, identifier: &str, currency: &Currency) -> Result<MinorUnits, AppError> {
        let account = self.get_account(identifier, currency).await?;
        Ok(self.repo.wallets().get_balance(account.id).await?)
    }

    /// Spendable balance plus what the account has locked in escrow.
    pub async fn account_summary(
        &self,
        identifier: &str,
        currency: &Currency,
    ) -> Result<AccountSummary, AppError> {
        let account = self.get_account(identifier, currency).await?;
        self.summarize(account).await
    }

    /// Summaries of every account, optionally for one owner.
    pub async fn balances(&self, owner_id: Option<&str>) -> Result<Vec<AccountSummary>, AppError> {
        let accounts = self.repo.wallets().list(owner_id).await?;
        let mut summaries = Vec::with_capacity(accounts.len());
        for account in accounts {
            summaries.push(self.summarize(account).await?);
        }
        Ok(summaries)
    }

    pub async fn suspend_account(
        &self,
        identifier: &str,
        currency: &Currency,
        actor: &str,
    ) -> Result<WalletAccount, AppError> {
        self.set_account_status(identifier, currency, AccountStatus::Suspended, actor)
            .await
    }

    pub async fn reactivate_account(
        &self,
        identifier: &str,
        currency: &Currency,
        actor: &str,
    ) -> Result<WalletAccount, AppError> {
        self.set_account_status(identifier, currency, AccountStatus::Active, actor)
            .await
    }

    async fn set_account_status(
        &self,
        identifier: &str,
        currency: &Currency,
        status: AccountStatus,
        actor: &str,
    ) -> Result<WalletAccount, AppError> {
        let account = self.get_account(identifier, currency).await?;
        if account.status == status {
            return Ok(account);
        }
        Ok(self.repo.wallets().set_status(account.id, status, actor).await?)
    }

    async fn summarize(&self, account: WalletAccount) -> Result<AccountSummary, AppError> {
        let held_in_escrow = self.repo.held_amount_for(account.id).await?;
        Ok(AccountSummary {
            account,
            held_in_escrow,
        })
    }

    // ========================
    // Ledger transactions
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<LedgerTransaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))
    }

    pub async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<LedgerTransaction, AppError> {
        self.repo
            .get_transaction_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction with reference {}", reference)))
    }

    /// Transactions newest first, optionally restricted to one account.
    pub async fn list_transactions(
        &self,
        account: Option<WalletId>,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        Ok(self.repo.list_transactions(account, limit).await?)
    }

    // ========================
    // Audit & reconciliation
    // ========================

    pub async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self.repo.audit().list(filter).await?)
    }

    /// Every audit entry produced by one transaction or escrow.
    pub async fn audit_trail(&self, correlation_id: Uuid) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self.repo.audit().for_correlation(correlation_id).await?)
    }

    /// Check that balances, transactions, escrow holds and the audit log agree.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, AppError> {
        let wallets = self.repo.wallets().list(None).await?;
        let transactions = self.repo.list_transactions(None, None).await?;
        let escrows = self.repo.list_escrows(None).await?;
        let audited = self.repo.audit().wallet_deltas().await?;

        Ok(build_reconciliation_report(
            &wallets,
            &transactions,
            &escrows,
            &audited,
        ))
    }
}
