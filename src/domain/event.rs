use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CommissionSplit, Currency, MinorUnits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Deposit,
    Withdraw,
    Transfer,
    EscrowHeld,
    EscrowReleaseRequested,
    EscrowReleased,
    EscrowRefunded,
    EscrowDisputed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAmounts {
    pub amount: MinorUnits,
    pub currency: Currency,
    pub net_amount: Option<MinorUnits>,
    pub commission_amount: Option<MinorUnits>,
}

/// Outbound notification emitted after a completed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub correlation_id: Uuid,
    pub actor_id: String,
    /// Owners who should hear about this event
    pub recipients: Vec<String>,
    pub amounts: EventAmounts,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new(
        kind: EventKind,
        correlation_id: Uuid,
        actor_id: impl Into<String>,
        amount: MinorUnits,
        currency: Currency,
    ) -> Self {
        Self {
            kind,
            correlation_id,
            actor_id: actor_id.into(),
            recipients: Vec::new(),
            amounts: EventAmounts {
                amount,
                currency,
                net_amount: None,
                commission_amount: None,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_split(mut self, split: CommissionSplit) -> Self {
        self.amounts.net_amount = Some(split.net_amount);
        self.amounts.commission_amount = Some(split.commission_amount);
        self
    }
}
