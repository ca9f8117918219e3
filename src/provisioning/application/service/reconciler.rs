use crate::core::domain::{
    error::OrchestratorResult,
    model::{
        deployment::{Deployment, DeploymentKind},
        guest::GuestStatus,
    },
    port::repository::{DeploymentRepository, GuestRepository},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

/// Fails deployments whose worker is gone so they stop blocking the guest.
pub struct Reconciler {
    deployments: Arc<dyn DeploymentRepository>,
    guests: Arc<dyn GuestRepository>,
    build_timeout: Duration,
    reinstall_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        guests: Arc<dyn GuestRepository>,
        build_timeout: Duration,
        reinstall_timeout: Duration,
    ) -> Self {
        Self {
            deployments,
            guests,
            build_timeout,
            reinstall_timeout,
        }
    }

    fn is_stale(&self, deployment: &Deployment, now: DateTime<Utc>) -> bool {
        let timeout = match deployment.kind {
            DeploymentKind::Build => self.build_timeout,
            DeploymentKind::Reinstall => self.reinstall_timeout,
        };
        let since = deployment.started_at.unwrap_or(deployment.created_at);
        // A negative age (clock skew) never counts as stale.
        matches!((now - since).to_std(), Ok(age) if age > timeout)
    }

    /// Fails every in-flight deployment older than its pipeline timeout and
    /// puts its guest into `error`. Returns the deployments that were failed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<Uuid>> {
        let mut reconciled = Vec::new();
        for mut deployment in self.deployments.in_flight().await? {
            if !self.is_stale(&deployment, now) {
                continue;
            }
            let step = deployment.current_step().map(|step| step.name.clone());
            deployment.fail("deployment abandoned: no progress within its timeout", now)?;
            self.deployments.save(&deployment).await?;

            match self.guests.get(deployment.guest).await {
                Ok(mut guest) => {
                    guest.is_installing = false;
                    guest.status = GuestStatus::Error;
                    self.guests.save(&guest).await?;
                }
                Err(err) => warn!(guest = %deployment.guest, error = %err, "guest of abandoned deployment not found"),
            }
            error!(
                guest = %deployment.guest,
                deployment = %deployment.uuid,
                step = step.as_deref().unwrap_or("none"),
                "abandoned deployment failed"
            );
            reconciled.push(deployment.uuid);
        }
        Ok(reconciled)
    }
}
