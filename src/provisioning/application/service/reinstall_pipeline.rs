use super::deployment_tracker::StepOutcome;
use super::pipeline::PipelineContext;
use crate::{
    core::domain::{
        error::OrchestratorResult,
        model::{
            deployment::{Deployment, StepDefinition},
            guest::GuestStatus,
            vm::PowerAction,
        },
    },
    provisioning::application::request::reinstall_request::ReinstallRequest,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const REINSTALL_STEPS: [StepDefinition; 7] = [
    StepDefinition {
        name: "Stopping VM",
        fatal: false,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Deleting VM",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Cloning template",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Configuring server",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Resizing disk",
        fatal: false,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Updating password",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Starting VM",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
];

/// Wipes a built guest and clones it again under the same VMID.
///
/// Never retried automatically; a failed reinstall leaves the guest in
/// `error` until someone asks again.
pub struct ReinstallPipeline {
    ctx: Arc<PipelineContext>,
}

impl ReinstallPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        mut deployment: Deployment,
        request: ReinstallRequest,
    ) -> OrchestratorResult<()> {
        self.ctx.tracker.start(&mut deployment).await?;

        match self.execute(&mut deployment, &request).await {
            Ok(()) => {
                let now = Utc::now();
                self.ctx
                    .update_guest(deployment.guest, |guest| {
                        guest.status = GuestStatus::Running;
                        guest.is_installing = false;
                        guest.installed_at = Some(now);
                    })
                    .await?;
                self.ctx.tracker.complete(&mut deployment).await?;
                info!(guest = %deployment.guest, deployment = %deployment.uuid, "guest reinstalled");
                Ok(())
            }
            Err(err) => {
                let settled = self
                    .ctx
                    .update_guest(deployment.guest, |guest| {
                        guest.status = GuestStatus::Error;
                        guest.is_installing = false;
                    })
                    .await;
                if let Err(record) = self.ctx.tracker.fail(&mut deployment, err.to_string()).await {
                    error!(deployment = %deployment.uuid, error = %record, "failure not recorded");
                }
                if let Err(settle) = settled {
                    error!(guest = %deployment.guest, error = %settle, "guest not settled");
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        deployment: &mut Deployment,
        request: &ReinstallRequest,
    ) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let guest = ctx.guests.get(deployment.guest).await?;
        let (node_id, vmid) = guest.placement()?;
        let node = ctx.placements.node(node_id).await?;
        let node_name = node.cluster_name.as_str();

        let stopped = ctx
            .tracker
            .run_step(deployment, 0, ctx.power(node_name, vmid, PowerAction::Kill))
            .await?;
        if let StepOutcome::Tolerated(err) = stopped {
            debug!(guest = %guest.uuid, %vmid, error = %err, "stop ignored");
        }

        ctx.tracker
            .run_step(deployment, 1, ctx.delete_guest(node_name, vmid))
            .await?
            .into_result()?;

        ctx.tracker
            .run_step(
                deployment,
                2,
                ctx.clone_template(&guest, &node, request.template, vmid, false),
            )
            .await?
            .into_result()?;

        ctx.tracker
            .run_step(deployment, 3, ctx.configure(&guest, node_name, vmid))
            .await?
            .into_result()?;

        ctx.tracker
            .run_step(
                deployment,
                4,
                ctx.resize_disk(node_name, vmid, guest.shape.disk_bytes),
            )
            .await?;

        let credentials = async {
            let primary = ctx.addresses.primary_address(guest.uuid).await?;
            ctx.write_credentials(
                node_name,
                vmid,
                "root",
                &request.root_password,
                primary.as_ref(),
            )
            .await
        };
        ctx.tracker
            .run_step(deployment, 5, credentials)
            .await?
            .into_result()?;

        ctx.tracker
            .run_step(deployment, 6, ctx.power(node_name, vmid, PowerAction::Start))
            .await?
            .into_result()
    }
}
