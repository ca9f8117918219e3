use super::deployment_tracker::StepOutcome;
use super::pipeline::{PipelineContext, failure_status};
use crate::{
    core::domain::{
        error::OrchestratorResult,
        model::{
            deployment::{Deployment, StepDefinition},
            guest::GuestStatus,
            vm::PowerAction,
        },
    },
    provisioning::application::request::build_request::BuildRequest,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const BUILD_STEPS: [StepDefinition; 6] = [
    StepDefinition {
        name: "Allocating resources",
        fatal: true,
        failure_status: GuestStatus::InstallFailed,
    },
    StepDefinition {
        name: "Cloning template",
        fatal: true,
        failure_status: GuestStatus::InstallFailed,
    },
    StepDefinition {
        name: "Configuring server",
        fatal: false,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Resizing disk",
        fatal: false,
        failure_status: GuestStatus::Error,
    },
    StepDefinition {
        name: "Applying credentials",
        fatal: true,
        failure_status: GuestStatus::Error,
    },
    // The guest exists at this point, it just did not boot.
    StepDefinition {
        name: "Starting VM",
        fatal: true,
        failure_status: GuestStatus::Stopped,
    },
];

/// First-time provisioning of a guest from a template.
pub struct BuildPipeline {
    ctx: Arc<PipelineContext>,
}

impl BuildPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Runs every step of `deployment` and settles the guest afterwards.
    /// A step failure is returned verbatim after it has been recorded.
    pub async fn run(&self, mut deployment: Deployment, request: BuildRequest) -> OrchestratorResult<()> {
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
                info!(guest = %deployment.guest, deployment = %deployment.uuid, "guest built");
                Ok(())
            }
            Err(err) => {
                let status = failure_status(&deployment, &BUILD_STEPS, GuestStatus::InstallFailed);
                let now = Utc::now();
                let settled = self
                    .ctx
                    .update_guest(deployment.guest, |guest| {
                        guest.status = status;
                        guest.is_installing = false;
                        if status == GuestStatus::Stopped {
                            guest.installed_at = Some(now);
                        }
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

    async fn execute(&self, deployment: &mut Deployment, request: &BuildRequest) -> OrchestratorResult<()> {
        let ctx = &self.ctx;
        let mut guest = ctx.guests.get(deployment.guest).await?;

        let (node, vmid) = ctx
            .tracker
            .run_step(deployment, 0, ctx.allocator.allocate(&mut guest, &request.exclude_nodes))
            .await?
            .into_result()?;
        let node_name = node.cluster_name.as_str();

        ctx.tracker
            .run_step(
                deployment,
                1,
                ctx.clone_template(&guest, &node, request.template, vmid, true),
            )
            .await?
            .into_result()?;

        let configured = ctx
            .tracker
            .run_step(deployment, 2, ctx.configure(&guest, node_name, vmid))
            .await?;
        if let StepOutcome::Tolerated(err) = configured {
            warn!(guest = %guest.uuid, %vmid, error = %err, "guest keeps its template shape");
        }

        let resized = ctx
            .tracker
            .run_step(
                deployment,
                3,
                ctx.resize_disk(node_name, vmid, guest.shape.disk_bytes),
            )
            .await?;
        if let StepOutcome::Tolerated(err) = resized {
            warn!(guest = %guest.uuid, %vmid, error = %err, "disk keeps its template size");
        }

        let credentials = async {
            let mut primary = None;
            for (index, address_id) in request.address_ids.iter().enumerate() {
                let claimed = ctx
                    .addresses
                    .claim(*address_id, guest.uuid, index == 0)
                    .await?;
                if index == 0 {
                    primary = Some(claimed);
                }
            }
            ctx.write_credentials(
                node_name,
                vmid,
                request.cloud_init_user(),
                &request.root_password,
                primary.as_ref(),
            )
            .await
        };
        ctx.tracker
            .run_step(deployment, 4, credentials)
            .await?
            .into_result()?;

        ctx.tracker
            .run_step(deployment, 5, ctx.power(node_name, vmid, PowerAction::Start))
            .await?
            .into_result()
    }
}
