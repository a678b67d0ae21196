//! Escrow holds and their settlement state machine.
//!
//! ```text
//! pending -> held -> released
//!               \--> refunded
//!               \--> dispute -> released | refunded
//! pending -> refunded | dispute
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CommissionRate, CommissionSplit, Currency, MinorUnits, WalletId};

pub type EscrowId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    /// Recorded but the payer's funds are not yet held
    Pending,
    /// Funds removed from the payer's spendable balance
    Held,
    Released,
    Refunded,
    /// Frozen until a resolver releases or refunds
    Dispute,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Held => "held",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Dispute => "dispute",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(EscrowStatus::Pending),
            "held" => Some(EscrowStatus::Held),
            "released" => Some(EscrowStatus::Released),
            "refunded" => Some(EscrowStatus::Refunded),
            "dispute" | "disputed" => Some(EscrowStatus::Dispute),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: EscrowStatus) -> bool {
        use EscrowStatus::{Dispute, Held, Pending, Refunded, Released};

        matches!(
            (self, target),
            (Pending, Held)
                | (Held | Dispute, Released)
                | (Held | Pending | Dispute, Refunded)
                | (Held | Pending, Dispute)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }

    /// True while the payer's funds sit in the hold.
    pub fn holds_funds(&self) -> bool {
        matches!(self, EscrowStatus::Held | EscrowStatus::Dispute)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Funds held by the platform against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: EscrowId,
    pub order_id: String,
    pub payer_id: String,
    pub payee_id: String,
    pub payer_wallet: WalletId,
    pub payee_wallet: WalletId,
    pub amount: MinorUnits,
    pub currency: Currency,
    /// Fixed when the escrow is created
    pub commission_rate: CommissionRate,
    /// Set on release
    pub commission_amount: Option<MinorUnits>,
    /// Set on release
    pub net_amount: Option<MinorUnits>,
    pub status: EscrowStatus,
    pub dispute_reason: Option<String>,
    pub resolved_by: Option<String>,
    /// Why the escrow was released or refunded, as given by the resolver
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub held_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl EscrowTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        payer_id: impl Into<String>,
        payee_id: impl Into<String>,
        payer_wallet: WalletId,
        payee_wallet: WalletId,
        amount: MinorUnits,
        currency: Currency,
        commission_rate: CommissionRate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.into(),
            payer_id: payer_id.into(),
            payee_id: payee_id.into(),
            payer_wallet,
            payee_wallet,
            amount,
            currency,
            commission_rate,
            commission_amount: None,
            net_amount: None,
            status: EscrowStatus::Pending,
            dispute_reason: None,
            resolved_by: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            held_at: None,
            disputed_at: None,
            released_at: None,
            refunded_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn split(&self) -> Option<CommissionSplit> {
        match (self.net_amount, self.commission_amount) {
            (Some(net_amount), Some(commission_amount)) => Some(CommissionSplit {
                net_amount,
                commission_amount,
            }),
            _ => None,
        }
    }

    /// Whether a second create request describes this same escrow.
    pub fn matches_request(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: MinorUnits,
        currency: &Currency,
        rate: CommissionRate,
    ) -> bool {
        self.payer_id == payer_id
            && self.payee_id == payee_id
            && self.amount == amount
            && &self.currency == currency
            && self.commission_rate == rate
    }
}
