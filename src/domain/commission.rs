use std::fmt;

use serde::{Deserialize, Serialize};

use super::MinorUnits;

const BPS_PER_WHOLE: u32 = 10_000;

/// Commission percentage expressed in basis points (2.5% = 250 bps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CommissionRate(u32);

impl CommissionRate {
    pub const ZERO: CommissionRate = CommissionRate(0);

    pub fn from_bps(bps: u32) -> Result<Self, CommissionRateError> {
        if bps > BPS_PER_WHOLE {
            return Err(CommissionRateError::OutOfRange(bps));
        }
        Ok(Self(bps))
    }

    /// Parse a decimal percentage such as "2.5" or "10" without going through floats.
    pub fn parse_percent(input: &str) -> Result<Self, CommissionRateError> {
        let input = input.trim().trim_end_matches('%');
        let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));

        if whole.is_empty() && fraction.is_empty() {
            return Err(CommissionRateError::InvalidFormat(input.to_string()));
        }
        if fraction.len() > 2
            || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(CommissionRateError::InvalidFormat(input.to_string()));
        }

        let whole: u32 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| CommissionRateError::InvalidFormat(input.to_string()))?
        };
        let fraction: u32 = format!("{:0<2}", fraction)
            .parse()
            .map_err(|_| CommissionRateError::InvalidFormat(input.to_string()))?;

        let bps = whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(fraction))
            .ok_or_else(|| CommissionRateError::InvalidFormat(input.to_string()))?;
        Self::from_bps(bps)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for CommissionRate {
    type Error = CommissionRateError;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        Self::from_bps(bps)
    }
}

impl From<CommissionRate> for u32 {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommissionRateError {
    #[error("commission of {0} bps exceeds 100%")]
    OutOfRange(u32),
    #[error("invalid commission percentage: '{0}'")]
    InvalidFormat(String),
}

/// Payee/platform split of a released escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub net_amount: MinorUnits,
    pub commission_amount: MinorUnits,
}

pub struct CommissionCalculator;

impl CommissionCalculator {
    /// Split `amount` into the payee's net and the platform's commission.
    /// Commission is rounded down to the minor unit and net takes the
    /// remainder, so `net + commission == amount` always holds.
    pub fn compute(amount: MinorUnits, rate: CommissionRate) -> CommissionSplit {
        let amount = amount.max(0);
        let commission = (amount as i128 * rate.bps() as i128) / BPS_PER_WHOLE as i128;
        // commission <= amount because rate <= 100%
        let commission_amount = commission as MinorUnits;
        CommissionSplit {
            net_amount: amount - commission_amount,
            commission_amount,
        }
    }
}
