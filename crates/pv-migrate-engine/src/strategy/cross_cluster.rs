use async_trait::async_trait;

use super::rsync_ssh::migrate_over_ssh;
use super::{AttemptReport, Strategy};
use crate::context::RunContext;
use crate::error::StrategyError;
use crate::manifests::ServiceExposure;
use crate::task::MigrationTask;

const NAME: &str = "rsync-ssh-cross-cluster";

/// rsync over ssh to an sshd pod behind a LoadBalancer service
///
/// Works for any topology as long as the source cluster can reach the load
/// balancer, which makes it the last resort. A claim is never copied onto
/// itself: its client and sshd pods would both need it attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsyncSshCrossCluster;

#[async_trait]
impl Strategy for RsyncSshCrossCluster {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_attempt(&self, task: &MigrationTask) -> bool {
        !task.same_claim()
    }

    async fn migrate(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<AttemptReport, StrategyError> {
        migrate_over_ssh(NAME, ServiceExposure::LoadBalancer, task, ctx).await
    }
}
