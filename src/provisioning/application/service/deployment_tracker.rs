//! Owns the deployment/step state machine and persists every transition.

use crate::core::domain::{
    error::{OrchestratorError, OrchestratorResult},
    model::deployment::{Deployment, DeploymentKind, StepDefinition},
    port::repository::DeploymentRepository,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a step that did not abort the pipeline.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Completed(T),
    /// A non-fatal step failed; the error is recorded on the step.
    Tolerated(OrchestratorError),
}

impl<T> StepOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            StepOutcome::Completed(value) => Some(value),
            StepOutcome::Tolerated(_) => None,
        }
    }

    /// For fatal steps, where a tolerated outcome cannot occur.
    pub fn into_result(self) -> OrchestratorResult<T> {
        match self {
            StepOutcome::Completed(value) => Ok(value),
            StepOutcome::Tolerated(err) => Err(err),
        }
    }
}

pub struct DeploymentTracker {
    repository: Arc<dyn DeploymentRepository>,
}

impl DeploymentTracker {
    pub fn new(repository: Arc<dyn DeploymentRepository>) -> Self {
        Self { repository }
    }

    /// Registers a pending deployment with all steps pending. Fails with
    /// `Conflict` if the guest already has one in flight.
    pub async fn create_deployment(
        &self,
        guest: Uuid,
        kind: DeploymentKind,
        steps: &[StepDefinition],
    ) -> OrchestratorResult<Deployment> {
        let deployment = self
            .repository
            .insert_if_idle(Deployment::new(guest, kind, steps, Utc::now()))
            .await?;
        info!(%guest, deployment = %deployment.uuid, ?kind, "deployment created");
        Ok(deployment)
    }

    pub async fn start(&self, deployment: &mut Deployment) -> OrchestratorResult<()> {
        deployment.start(Utc::now())?;
        self.repository.save(deployment).await?;
        info!(guest = %deployment.guest, deployment = %deployment.uuid, "deployment started");
        Ok(())
    }

    /// Brackets `work` with the transitions of step `index`.
    ///
    /// A fatal step's error is recorded and returned. A non-fatal step's error
    /// is recorded on a completed step and handed back as
    /// [`StepOutcome::Tolerated`].
    pub async fn run_step<T, Fut>(
        &self,
        deployment: &mut Deployment,
        index: usize,
        work: Fut,
    ) -> OrchestratorResult<StepOutcome<T>>
    where
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        deployment.begin_step(index, Utc::now())?;
        self.repository.save(deployment).await?;
        let (name, fatal) = {
            let step = &deployment.steps[index];
            (step.name.clone(), step.fatal)
        };
        info!(deployment = %deployment.uuid, step = %name, index, "step started");

        match work.await {
            Ok(value) => {
                deployment.complete_step(index, Utc::now())?;
                self.repository.save(deployment).await?;
                info!(deployment = %deployment.uuid, step = %name, "step completed");
                Ok(StepOutcome::Completed(value))
            }
            Err(err) if !fatal => {
                deployment.tolerate_step(index, err.to_string(), Utc::now())?;
                self.repository.save(deployment).await?;
                warn!(deployment = %deployment.uuid, step = %name, error = %err, "non-fatal step failed");
                Ok(StepOutcome::Tolerated(err))
            }
            Err(err) => {
                deployment.fail_step(index, err.to_string(), Utc::now())?;
                self.repository.save(deployment).await?;
                error!(deployment = %deployment.uuid, step = %name, error = %err, "step failed");
                Err(err)
            }
        }
    }

    pub async fn complete(&self, deployment: &mut Deployment) -> OrchestratorResult<()> {
        deployment.complete(Utc::now())?;
        self.repository.save(deployment).await?;
        info!(guest = %deployment.guest, deployment = %deployment.uuid, "deployment completed");
        Ok(())
    }

    pub async fn fail(
        &self,
        deployment: &mut Deployment,
        reason: impl Into<String>,
    ) -> OrchestratorResult<()> {
        deployment.fail(reason, Utc::now())?;
        self.repository.save(deployment).await?;
        error!(
            guest = %deployment.guest,
            deployment = %deployment.uuid,
            error = deployment.error.as_deref().unwrap_or_default(),
            "deployment failed"
        );
        Ok(())
    }

    /// The latest in-flight deployment of a guest, with its steps.
    pub async fn current_deployment(&self, guest: Uuid) -> OrchestratorResult<Option<Deployment>> {
        self.repository.in_flight_for_guest(guest).await
    }

    pub async fn history(&self, guest: Uuid) -> OrchestratorResult<Vec<Deployment>> {
        self.repository.history_for_guest(guest).await
    }
}
