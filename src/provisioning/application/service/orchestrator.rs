//! The entry point callers use to build, reinstall and operate guests.

use super::{
    build_pipeline::{BUILD_STEPS, BuildPipeline},
    pipeline::PipelineContext,
    power_service::{GuestLocks, PowerService},
    reconciler::Reconciler,
    reinstall_pipeline::{REINSTALL_STEPS, ReinstallPipeline},
    scheduler::Scheduler,
};
use crate::{
    config::OrchestratorConfig,
    core::domain::{
        error::OrchestratorResult,
        model::{
            deployment::{Deployment, DeploymentKind},
            guest::{Guest, GuestStatus},
            vm::PowerAction,
        },
        port::{
            hypervisor::Hypervisor,
            repository::{AddressPool, DeploymentRepository, GuestRepository, PlacementStore},
        },
        value_object::RootPassword,
    },
    provisioning::application::request::{
        build_request::BuildRequest, reinstall_request::ReinstallRequest,
    },
};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// The collaborators an [`Orchestrator`] drives.
#[derive(Clone)]
pub struct OrchestratorPorts {
    pub hypervisor: Arc<dyn Hypervisor>,
    pub guests: Arc<dyn GuestRepository>,
    pub deployments: Arc<dyn DeploymentRepository>,
    pub placements: Arc<dyn PlacementStore>,
    pub addresses: Arc<dyn AddressPool>,
}

impl OrchestratorPorts {
    /// All persistence ports served by one store.
    pub fn from_store<S>(hypervisor: Arc<dyn Hypervisor>, store: Arc<S>) -> Self
    where
        S: GuestRepository + DeploymentRepository + PlacementStore + AddressPool + 'static,
    {
        Self {
            hypervisor,
            guests: store.clone(),
            deployments: store.clone(),
            placements: store.clone(),
            addresses: store,
        }
    }
}

/// A deployment that was admitted and handed to the worker pool.
#[derive(Debug)]
pub struct DeploymentHandle {
    /// The deployment as it was created, still pending.
    pub deployment: Deployment,
    task: JoinHandle<()>,
}

impl DeploymentHandle {
    pub fn uuid(&self) -> Uuid {
        self.deployment.uuid
    }

    /// Waits for the pipeline to end. The outcome is on the stored deployment.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            error!(deployment = %self.deployment.uuid, error = %err, "pipeline task aborted");
        }
    }
}

pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    guests: Arc<dyn GuestRepository>,
    ctx: Arc<PipelineContext>,
    build: Arc<BuildPipeline>,
    reinstall: Arc<ReinstallPipeline>,
    power: PowerService,
    reconciler: Reconciler,
    scheduler: Scheduler,
    locks: Arc<GuestLocks>,
}

impl Orchestrator {
    pub fn new(ports: OrchestratorPorts, config: OrchestratorConfig) -> OrchestratorResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let locks = Arc::new(GuestLocks::new());
        let ctx = Arc::new(PipelineContext::new(
            Arc::clone(&config),
            Arc::clone(&ports.hypervisor),
            Arc::clone(&ports.guests),
            Arc::clone(&ports.deployments),
            Arc::clone(&ports.placements),
            Arc::clone(&ports.addresses),
        ));
        let power = PowerService::new(
            Arc::clone(&config),
            Arc::clone(&ports.hypervisor),
            Arc::clone(&ports.guests),
            Arc::clone(&ports.deployments),
            Arc::clone(&ports.placements),
            Arc::clone(&locks),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&ports.deployments),
            Arc::clone(&ports.guests),
            config.build_timeout,
            config.reinstall_timeout,
        );

        Ok(Self {
            scheduler: Scheduler::new(config.max_concurrent_pipelines),
            build: Arc::new(BuildPipeline::new(Arc::clone(&ctx))),
            reinstall: Arc::new(ReinstallPipeline::new(Arc::clone(&ctx))),
            guests: ports.guests,
            config,
            ctx,
            power,
            reconciler,
            locks,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Admits a build and schedules its pipeline.
    ///
    /// Fails with `Conflict` when the guest already has a deployment in
    /// flight or a power action is running on it.
    pub async fn build(&self, request: BuildRequest) -> OrchestratorResult<DeploymentHandle> {
        let deployment = self
            .admit(request.guest, DeploymentKind::Build, |guest| {
                guest.status = GuestStatus::Installing;
            })
            .await?;

        let pipeline = Arc::clone(&self.build);
        let pending = deployment.clone();
        let task = self.scheduler.dispatch(
            deployment.uuid,
            self.config.build_timeout,
            async move { pipeline.run(pending, request).await },
        );
        Ok(DeploymentHandle { deployment, task })
    }

    /// Admits a reinstall of a built, unsuspended guest and schedules it.
    pub async fn reinstall(&self, request: ReinstallRequest) -> OrchestratorResult<DeploymentHandle> {
        let guest = self.guests.get(request.guest).await?;
        guest.ensure_not_suspended()?;
        guest.placement()?;

        let deployment = self
            .admit(request.guest, DeploymentKind::Reinstall, |guest| {
                guest.status = GuestStatus::Reinstalling;
            })
            .await?;

        let pipeline = Arc::clone(&self.reinstall);
        let pending = deployment.clone();
        let task = self.scheduler.dispatch(
            deployment.uuid,
            self.config.reinstall_timeout,
            async move { pipeline.run(pending, request).await },
        );
        Ok(DeploymentHandle { deployment, task })
    }

    /// Creates the deployment and flags the guest as installing, while
    /// holding the guest lock so no power action slips in between.
    async fn admit<F>(&self, guest: Uuid, kind: DeploymentKind, mark: F) -> OrchestratorResult<Deployment>
    where
        F: FnOnce(&mut Guest),
    {
        let _lock = self.locks.try_acquire(guest).await?;
        let steps = match kind {
            DeploymentKind::Build => &BUILD_STEPS[..],
            DeploymentKind::Reinstall => &REINSTALL_STEPS[..],
        };
        self.guests.get(guest).await?;
        let mut deployment = self.ctx.tracker.create_deployment(guest, kind, steps).await?;
        let marked = self
            .ctx
            .update_guest(guest, |g| {
                g.is_installing = true;
                mark(g);
            })
            .await;
        if let Err(err) = marked {
            if let Err(record) = self.ctx.tracker.fail(&mut deployment, err.to_string()).await {
                error!(deployment = %deployment.uuid, error = %record, "failure not recorded");
            }
            return Err(err);
        }
        info!(%guest, deployment = %deployment.uuid, ?kind, "deployment admitted");
        Ok(deployment)
    }

    pub async fn power(&self, guest: Uuid, action: PowerAction) -> OrchestratorResult<Guest> {
        self.power.power(guest, action).await
    }

    pub async fn update_password(&self, guest: Uuid, password: &RootPassword) -> OrchestratorResult<()> {
        self.power.update_password(guest, password).await
    }

    /// The in-flight deployment of a guest, with its steps.
    pub async fn current_deployment(&self, guest: Uuid) -> OrchestratorResult<Option<Deployment>> {
        self.ctx.tracker.current_deployment(guest).await
    }

    pub async fn deployment_history(&self, guest: Uuid) -> OrchestratorResult<Vec<Deployment>> {
        self.ctx.tracker.history(guest).await
    }

    pub async fn sync_status(&self, guest: Uuid) -> OrchestratorResult<Guest> {
        self.power.sync_status(guest).await
    }

    /// Fails abandoned deployments. Returns the ones that were failed.
    pub async fn reconcile(&self) -> OrchestratorResult<Vec<Uuid>> {
        self.reconciler.sweep(Utc::now()).await
    }
}
