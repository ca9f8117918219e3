//! Deployment and step records, with their state machine.
//!
//! All transitions are pure: they take the timestamp to stamp and return an
//! error instead of mutating when the move is not allowed. Persisting the
//! result is the tracker's job.

use crate::core::domain::error::{OrchestratorError, OrchestratorResult};
use crate::core::domain::model::guest::GuestStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    Build,
    Reinstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DeploymentStatus {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeploymentStatus::Pending | DeploymentStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Static description of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: &'static str,
    /// A failing non-fatal step is recorded and the pipeline moves on.
    pub fatal: bool,
    /// Guest status to record when this step fails fatally.
    pub failure_status: GuestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    pub fatal: bool,
    pub status: StepStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentStep {
    fn pending(definition: &StepDefinition) -> Self {
        Self {
            name: definition.name.to_string(),
            fatal: definition.fatal,
            status: StepStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Wall time between start and completion, once both are known.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// One build or reinstall attempt for a guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Internal id, assigned by the repository on insert.
    pub id: u64,
    pub uuid: Uuid,
    pub guest: Uuid,
    pub kind: DeploymentKind,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub steps: Vec<DeploymentStep>,
    /// Index of the next step allowed to start.
    pub cursor: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// A pending deployment with every step pre-registered as pending.
    pub fn new(
        guest: Uuid,
        kind: DeploymentKind,
        steps: &[StepDefinition],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            guest,
            kind,
            status: DeploymentStatus::Pending,
            error: None,
            steps: steps.iter().map(DeploymentStep::pending).collect(),
            cursor: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }

    /// The step currently running, if any.
    #[must_use]
    pub fn current_step(&self) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.status == StepStatus::Running)
    }

    /// pending -> running. Already running is a no-op.
    pub fn start(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        match self.status {
            DeploymentStatus::Running => Ok(()),
            DeploymentStatus::Pending => {
                self.status = DeploymentStatus::Running;
                self.started_at = Some(now);
                Ok(())
            }
            status => Err(self.invalid(format!("cannot start a {:?} deployment", status))),
        }
    }

    /// Moves step `index` to running, enforcing declared order.
    pub fn begin_step(&mut self, index: usize, now: DateTime<Utc>) -> OrchestratorResult<()> {
        if self.status != DeploymentStatus::Running {
            return Err(self.invalid(format!(
                "step {} cannot run while deployment is {:?}",
                index, self.status
            )));
        }
        if index != self.cursor {
            return Err(self.invalid(format!(
                "step {} is out of order, next step is {}",
                index, self.cursor
            )));
        }
        if self.steps[..index]
            .iter()
            .any(|s| s.status != StepStatus::Completed)
        {
            return Err(self.invalid(format!("step {} has an unfinished predecessor", index)));
        }
        let step = self.step_mut(index)?;
        if step.status != StepStatus::Pending {
            let status = step.status;
            return Err(self.invalid(format!("step {} is {:?}, not pending", index, status)));
        }
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        Ok(())
    }

    /// running -> completed.
    pub fn complete_step(&mut self, index: usize, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.finish_step(index, StepStatus::Completed, None, now)
    }

    /// running -> completed, keeping the error of a tolerated failure.
    pub fn tolerate_step(
        &mut self,
        index: usize,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        self.finish_step(index, StepStatus::Completed, Some(error.into()), now)
    }

    /// running -> failed.
    pub fn fail_step(
        &mut self,
        index: usize,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        self.finish_step(index, StepStatus::Failed, Some(error.into()), now)
    }

    fn finish_step(
        &mut self,
        index: usize,
        status: StepStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let step = self.step_mut(index)?;
        if step.status != StepStatus::Running {
            let current = step.status;
            return Err(self.invalid(format!("step {} is {:?}, not running", index, current)));
        }
        step.status = status;
        step.error = error;
        step.completed_at = Some(now);
        if status == StepStatus::Completed {
            self.cursor = index + 1;
        }
        Ok(())
    }

    /// Terminal success. Idempotent.
    pub fn complete(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        match self.status {
            DeploymentStatus::Completed => Ok(()),
            DeploymentStatus::Failed => Err(self.invalid("cannot complete a failed deployment")),
            _ => {
                if let Some(step) = self.steps.iter().find(|s| s.status != StepStatus::Completed) {
                    let name = step.name.clone();
                    return Err(self.invalid(format!("step '{}' has not completed", name)));
                }
                self.status = DeploymentStatus::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
        }
    }

    /// Terminal failure. Idempotent; a step still running is failed with the
    /// same reason.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> OrchestratorResult<()> {
        match self.status {
            DeploymentStatus::Failed => Ok(()),
            DeploymentStatus::Completed => {
                Err(self.invalid("cannot fail a completed deployment"))
            }
            _ => {
                let reason = reason.into();
                for step in self
                    .steps
                    .iter_mut()
                    .filter(|s| s.status == StepStatus::Running)
                {
                    step.status = StepStatus::Failed;
                    step.error = Some(reason.clone());
                    step.completed_at = Some(now);
                }
                self.status = DeploymentStatus::Failed;
                self.error = Some(reason);
                self.completed_at = Some(now);
                Ok(())
            }
        }
    }

    fn step_mut(&mut self, index: usize) -> OrchestratorResult<&mut DeploymentStep> {
        let uuid = self.uuid;
        self.steps.get_mut(index).ok_or_else(|| {
            OrchestratorError::InvalidTransition(format!(
                "deployment {} has no step {}",
                uuid, index
            ))
        })
    }

    fn invalid(&self, message: impl AsRef<str>) -> OrchestratorError {
        OrchestratorError::InvalidTransition(format!(
            "deployment {}: {}",
            self.uuid,
            message.as_ref()
        ))
    }
}
