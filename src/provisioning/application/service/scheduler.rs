use crate::core::domain::error::OrchestratorResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Bounded worker pool for pipelines.
///
/// Pipelines of different guests run side by side up to the pool size. Each
/// run carries an outer timeout; a run that overruns it is dropped and its
/// deployment is left for the reconciler, exactly like a crashed worker.
#[derive(Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Free worker slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn dispatch<F>(&self, deployment: Uuid, outer_timeout: Duration, work: F) -> JoinHandle<()>
    where
        F: Future<Output = OrchestratorResult<()>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(%deployment, "worker pool closed, pipeline not started");
                    return;
                }
            };
            match tokio::time::timeout(outer_timeout, work).await {
                Ok(Ok(())) => info!(%deployment, "pipeline finished"),
                Ok(Err(err)) => warn!(%deployment, error = %err, "pipeline ended with failure"),
                Err(_) => error!(
                    %deployment,
                    timeout = ?outer_timeout,
                    "pipeline overran its timeout, leaving deployment for reconciliation"
                ),
            }
        })
    }
}
