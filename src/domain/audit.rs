use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AuditId = Uuid;

/// Well-known audit actions.
pub mod actions {
    pub const WALLET_CREDIT: &str = "wallet.credit";
    pub const WALLET_DEBIT: &str = "wallet.debit";
    pub const WALLET_SUSPENDED: &str = "wallet.suspended";
    pub const WALLET_REACTIVATED: &str = "wallet.reactivated";
    pub const ESCROW_HELD: &str = "escrow.held";
    pub const ESCROW_RELEASE_REQUESTED: &str = "escrow.release_requested";
    pub const ESCROW_RELEASED: &str = "escrow.released";
    pub const ESCROW_REFUNDED: &str = "escrow.refunded";
    pub const ESCROW_DISPUTED: &str = "escrow.disputed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditTarget {
    Wallet,
    Escrow,
}

impl AuditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTarget::Wallet => "wallet",
            AuditTarget::Escrow => "escrow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wallet" => Some(AuditTarget::Wallet),
            "escrow" => Some(AuditTarget::Escrow),
            _ => None,
        }
    }
}

/// Immutable record of one core mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    /// Assigned by the recorder, strictly increasing
    pub sequence: i64,
    pub action: String,
    pub actor_id: String,
    pub target_type: AuditTarget,
    pub target_id: String,
    /// Id of the ledger transaction or escrow that caused the mutation
    pub correlation_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor_id: impl Into<String>,
        target_type: AuditTarget,
        target_id: impl ToString,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            action: action.into(),
            actor_id: actor_id.into(),
            target_type,
            target_id: target_id.to_string(),
            correlation_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
