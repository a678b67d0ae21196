use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, MinorUnits, WalletId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionType::Deposit),
            "withdraw" => Some(TransactionType::Withdraw),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One deposit, withdrawal or transfer. Created `pending` when the operation
/// begins, then moved exactly once to `completed` or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    /// Caller-supplied idempotency key, unique across all transactions
    pub reference: String,
    pub tx_type: TransactionType,
    /// Debited account (none for deposits)
    pub sender: Option<WalletId>,
    /// Credited account (none for withdrawals)
    pub receiver: Option<WalletId>,
    pub amount: MinorUnits,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    /// Sender balance right after this transaction was applied
    pub sender_balance_after: Option<MinorUnits>,
    /// Receiver balance right after this transaction was applied
    pub receiver_balance_after: Option<MinorUnits>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerTransaction {
    fn new(
        tx_type: TransactionType,
        sender: Option<WalletId>,
        receiver: Option<WalletId>,
        amount: MinorUnits,
        currency: Currency,
        reference: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            tx_type,
            sender,
            receiver,
            amount,
            currency,
            status: TransactionStatus::Pending,
            description: None,
            metadata: serde_json::Value::Null,
            sender_balance_after: None,
            receiver_balance_after: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn deposit(
        account: WalletId,
        amount: MinorUnits,
        currency: Currency,
        reference: impl Into<String>,
    ) -> Self {
        Self::new(
            TransactionType::Deposit,
            None,
            Some(account),
            amount,
            currency,
            reference,
        )
    }

    pub fn withdraw(
        account: WalletId,
        amount: MinorUnits,
        currency: Currency,
        reference: impl Into<String>,
    ) -> Self {
        Self::new(
            TransactionType::Withdraw,
            Some(account),
            None,
            amount,
            currency,
            reference,
        )
    }

    pub fn transfer(
        sender: WalletId,
        receiver: WalletId,
        amount: MinorUnits,
        currency: Currency,
        reference: impl Into<String>,
    ) -> Self {
        Self::new(
            TransactionType::Transfer,
            Some(sender),
            Some(receiver),
            amount,
            currency,
            reference,
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Whether a resubmission under this reference describes the same operation.
    pub fn matches_request(
        &self,
        tx_type: TransactionType,
        sender: Option<WalletId>,
        receiver: Option<WalletId>,
        amount: MinorUnits,
        currency: &Currency,
    ) -> bool {
        self.tx_type == tx_type
            && self.sender == sender
            && self.receiver == receiver
            && self.amount == amount
            && &self.currency == currency
    }

    /// Signed effect of this transaction on `wallet`.
    pub fn delta_for(&self, wallet: WalletId) -> MinorUnits {
        let mut delta = 0;
        if self.receiver == Some(wallet) {
            delta += self.amount;
        }
        if self.sender == Some(wallet) {
            delta -= self.amount;
        }
        delta
    }
}

/// What a caller learns about a deposit, withdrawal or transfer.
/// Replaying the same reference yields an identical result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction: LedgerTransaction,
    pub sender_balance: Option<MinorUnits>,
    pub receiver_balance: Option<MinorUnits>,
}

impl From<LedgerTransaction> for TransactionResult {
    fn from(transaction: LedgerTransaction) -> Self {
        Self {
            sender_balance: transaction.sender_balance_after,
            receiver_balance: transaction.receiver_balance_after,
            transaction,
        }
    }
}
