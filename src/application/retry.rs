use std::future::Future;

use tracing::{debug, warn};

use crate::config::RetryPolicy;

use super::AppError;

/// Run `op` until it succeeds, fails definitely, or runs out of retries.
///
/// Only `ConcurrencyConflict` is retried. Each attempt must be a complete
/// unit of work so that a lost race leaves nothing behind.
pub async fn retry_conflicts<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                debug!(operation, attempt, error = %err, "retrying after conflict");
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(err) if err.is_retryable() => {
                warn!(operation, attempts = attempt + 1, error = %err, "giving up after repeated conflicts");
                return Err(err);
            }
            other => return other,
        }
    }
}
