use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Money is represented as integer minor units to avoid floating-point precision issues.
/// For EUR/USD, 1 unit = 100 minor units; for GNF the franc is already the minor unit.
pub type MinorUnits = i64;

/// Currencies whose smallest unit is the major unit itself.
const ZERO_DECIMAL_CURRENCIES: [&str; 5] = ["GNF", "XOF", "XAF", "JPY", "KRW"];

/// An ISO 4217 shaped currency code: three ASCII letters, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, ParseAmountError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ParseAmountError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal digits between the major and the minor unit.
    pub fn exponent(&self) -> u32 {
        if ZERO_DECIMAL_CURRENCIES.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }
}

impl FromStr for Currency {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = ParseAmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format minor units as a human-readable amount for the given currency.
/// Example: 5000 EUR -> "50.00 EUR", 5000 GNF -> "5000 GNF"
pub fn format_amount(amount: MinorUnits, currency: &Currency) -> String {
    let exponent = currency.exponent();
    if exponent == 0 {
        return format!("{} {}", amount, currency);
    }

    let sign = if amount < 0 { "-" } else { "" };
    let scale = 10_i64.pow(exponent);
    let abs = amount.unsigned_abs();
    let units = abs / scale as u64;
    let remainder = abs % scale as u64;
    format!(
        "{}{}.{:0width$} {}",
        sign,
        units,
        remainder,
        currency,
        width = exponent as usize
    )
}

/// Parse a positive decimal string into minor units of the given currency.
/// Example: "50.00" EUR -> 5000, "12.5" EUR -> 1250, "4000" GNF -> 4000
pub fn parse_amount(input: &str, currency: &Currency) -> Result<MinorUnits, ParseAmountError> {
    let input = input.trim();
    if input.starts_with('-') {
        return Err(ParseAmountError::Negative);
    }

    let exponent = currency.exponent() as usize;
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };

    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return Err(ParseAmountError::InvalidFormat);
    }
    if fraction.len() > exponent {
        return Err(ParseAmountError::TooPrecise {
            digits: fraction.len(),
            allowed: exponent,
        });
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(ParseAmountError::InvalidFormat);
    }

    let units: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| ParseAmountError::InvalidFormat)?
    };
    let padded = format!("{:0<width$}", fraction, width = exponent);
    let minor: i64 = if padded.is_empty() {
        0
    } else {
        padded.parse().map_err(|_| ParseAmountError::InvalidFormat)?
    };

    units
        .checked_mul(10_i64.pow(exponent as u32))
        .and_then(|v| v.checked_add(minor))
        .ok_or(ParseAmountError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseAmountError {
    #[error("invalid money format")]
    InvalidFormat,
    #[error("amount must not be negative")]
    Negative,
    #[error("amount has {digits} decimal digits, currency allows {allowed}")]
    TooPrecise { digits: usize, allowed: usize },
    #[error("amount is too large")]
    Overflow,
    #[error("invalid currency code: '{0}'")]
    InvalidCurrency(String),
}
