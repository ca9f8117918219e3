use crate::{
    config::RetryPolicy,
    core::domain::error::{OrchestratorError, OrchestratorResult},
};
use std::future::Future;
use tracing::warn;

/// Runs a unit of work under a bounded retry budget.
///
/// Only retryable errors are retried; an attempt that overruns the
/// per-attempt timeout counts as a transient fault.
#[derive(Debug, Clone, Copy)]
pub struct RetryDriver {
    policy: RetryPolicy,
}

impl RetryDriver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Calls `work` with the 1-based attempt number until it succeeds, fails
    /// terminally, or the budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut work: F) -> OrchestratorResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.attempt_timeout, work(attempt)).await
            {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::TransientFault(format!(
                    "{} attempt {} timed out after {:?}",
                    operation, attempt, self.policy.attempt_timeout
                ))),
            };
            match result {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(operation, attempt, error = %err, ?delay, "retrying after transient fault");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
