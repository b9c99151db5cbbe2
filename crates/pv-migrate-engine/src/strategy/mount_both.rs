//! Copy through a single pod that mounts both claims

use async_trait::async_trait;
use tracing::debug;

use super::{AttemptReport, Strategy};
use crate::context::RunContext;
use crate::error::{Phase, StrategyError};
use crate::manifests::{self, ROLE_RSYNC};
use crate::resources::TransientResources;
use crate::rsync::RsyncCommand;
use crate::task::MigrationTask;
use crate::transfer::{run_rsync, until_cancelled};

const NAME: &str = "mount-both";

/// Mounts source (read-only) and destination in one pod and runs rsync
/// locally. Only possible when both claims are in the same namespace of the
/// same cluster and can be attached to the same node.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountBoth;

/// Node the shared pod must run on
///
/// `None` when the claims are pinned to different nodes or their volumes
/// live in disjoint zones; `Some(None)` when any node will do.
fn placement(task: &MigrationTask) -> Option<Option<&str>> {
    let (source_info, dest_info) = (&task.source().info, &task.dest().info);
    if !source_info.topology.compatible_with(&dest_info.topology) {
        return None;
    }
    let source = source_info.pinned_node(true);
    let dest = dest_info.pinned_node(false);
    match (source, dest) {
        (Some(a), Some(b)) if a != b => None,
        (a, b) => Some(a.or(b)),
    }
}

impl MountBoth {
    async fn run(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
        resources: &mut TransientResources,
    ) -> Result<(), StrategyError> {
        let settings = ctx.settings();
        let node = placement(task).ok_or_else(|| {
            StrategyError::transfer(
                Phase::Provision,
                "source and destination cannot be attached to the same node",
            )
        })?;

        let source = task.source();
        let namespace = source.namespace();
        let cluster = &source.cluster;
        let pod_name = resources.attempt().resource_name(ROLE_RSYNC);

        let pod = manifests::mount_both_pod(
            resources.attempt(),
            namespace,
            source.claim(),
            task.dest().claim(),
            node,
            &settings.rsync_image,
        );
        debug!(pod = %pod_name, node = ?node, "Creating shared mount pod");
        resources.create_pod(cluster, &pod).await?;

        until_cancelled(
            ctx.cancel(),
            Phase::Ready,
            cluster.wait_pod_ready(namespace, &pod_name, settings.ready_timeout, ctx.cancel()),
        )
        .await?;

        let command = RsyncCommand::local(task.delete_extraneous());
        run_rsync(cluster, namespace, &pod_name, &command, NAME, ctx).await
    }
}

#[async_trait]
impl Strategy for MountBoth {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_attempt(&self, task: &MigrationTask) -> bool {
        task.same_namespace() && !task.same_claim() && placement(task).is_some()
    }

    async fn migrate(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<AttemptReport, StrategyError> {
        let mut resources = TransientResources::new(NAME, ctx.sink().clone());
        let outcome = self.run(task, ctx, &mut resources).await;
        resources.release(outcome).await
    }
}
