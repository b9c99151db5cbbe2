use async_trait::async_trait;

use super::rsync_ssh::migrate_over_ssh;
use super::{AttemptReport, Strategy};
use crate::context::RunContext;
use crate::error::StrategyError;
use crate::manifests::ServiceExposure;
use crate::task::MigrationTask;

const NAME: &str = "rsync-ssh-in-cluster";

/// rsync over ssh to an sshd pod behind a ClusterIP service, for claims in
/// the same cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct RsyncSshInCluster;

#[async_trait]
impl Strategy for RsyncSshInCluster {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_attempt(&self, task: &MigrationTask) -> bool {
        task.same_cluster() && !task.same_claim()
    }

    async fn migrate(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<AttemptReport, StrategyError> {
        migrate_over_ssh(NAME, ServiceExposure::ClusterIp, task, ctx).await
    }
}
