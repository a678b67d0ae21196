use thiserror::Error;

use crate::domain::{EscrowStatus, MinorUnits};
use crate::storage::StoreError;

/// Broad category of a failure, for callers that branch on outcome rather than message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    AccountNotFound,
    SelfOperation,
    InvalidStateTransition,
    ConcurrencyConflict,
    PermissionDenied,
    NotFound,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::SelfOperation => "self_operation",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Database => "database_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: String,
        balance: MinorUnits,
        required: MinorUnits,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Sender and receiver are the same account: {0}")]
    SelfOperation(String),

    #[error("Escrow {escrow} cannot move from {from} to {to}")]
    InvalidStateTransition {
        escrow: String,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    #[error("Concurrent modification: {0}")]
    ConcurrencyConflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            AppError::SelfOperation(_) => ErrorKind::SelfOperation,
            AppError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            AppError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            AppError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Database(_) => ErrorKind::Database,
        }
    }

    /// Only lost races are worth retrying; every other failure is definite.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds {
                wallet,
                balance,
                required,
            } => AppError::InsufficientFunds {
                account: wallet.to_string(),
                balance,
                required,
            },
            StoreError::Conflict(msg) => AppError::ConcurrencyConflict(msg),
            StoreError::Duplicate(msg) => AppError::ConcurrencyConflict(format!("duplicate in progress: {}", msg)),
            StoreError::WalletNotFound(id) => AppError::AccountNotFound(id.to_string()),
            StoreError::Suspended(id) => AppError::PermissionDenied(format!("account {} is suspended", id)),
            StoreError::Overflow(id) => {
                AppError::Validation(format!("amount would overflow the balance of account {}", id))
            }
            StoreError::Other(err) => AppError::Database(err),
        }
    }
}

impl From<crate::domain::ParseAmountError> for AppError {
    fn from(err: crate::domain::ParseAmountError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<crate::domain::CommissionRateError> for AppError {
    fn from(err: crate::domain::CommissionRateError) -> Self {
        AppError::Validation(err.to_string())
    }
}
