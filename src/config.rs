use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::MinorUnits;

pub const DEFAULT_MIN_WITHDRAWAL: MinorUnits = 1000;
pub const DEFAULT_PLATFORM_OWNER: &str = "platform";
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 10;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Runtime settings for the ledger services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Smallest amount, in minor units, a withdrawal may move
    pub min_withdrawal: MinorUnits,
    /// Owner of the accounts that collect commission
    pub platform_owner: String,
    /// Actors allowed to settle escrows and resolve disputes
    pub resolvers: Vec<String>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_withdrawal: DEFAULT_MIN_WITHDRAWAL,
            platform_owner: DEFAULT_PLATFORM_OWNER.to_string(),
            resolvers: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl LedgerConfig {
    pub fn with_resolvers<I, S>(mut self, resolvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolvers = resolvers.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_resolver(&self, actor: &str) -> bool {
        self.resolvers.iter().any(|r| r == actor)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// How often and how patiently to retry a conflicting unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits n times the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}
