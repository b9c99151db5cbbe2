//! Migration strategies
//!
//! A strategy is one way of moving data between two claims. The engine asks
//! each strategy, in order, whether it can handle the resolved topology and
//! runs the first ones that can until one succeeds.

mod cross_cluster;
mod in_cluster;
mod mount_both;
mod rsync_ssh;

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::context::RunContext;
use crate::error::StrategyError;
use crate::task::MigrationTask;

pub use cross_cluster::RsyncSshCrossCluster;
pub use in_cluster::RsyncSshInCluster;
pub use mount_both::MountBoth;

/// What a successful attempt leaves behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptReport {
    /// Transient objects that could not be deleted after the copy succeeded
    pub teardown_warnings: Vec<String>,
}

/// One way of copying a claim's data
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable identifier used in logs and overrides
    fn name(&self) -> &'static str;

    /// Whether this strategy can handle the task's topology
    ///
    /// Must be cheap and must not touch the clusters.
    fn can_attempt(&self, task: &MigrationTask) -> bool;

    /// Provision, copy, verify and tear down
    ///
    /// Teardown runs exactly once, whatever the outcome.
    async fn migrate(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<AttemptReport, StrategyError>;
}

/// All built-in strategies, cheapest first
pub fn default_strategies() -> Vec<Arc<dyn Strategy>> {
    vec![
        Arc::new(MountBoth),
        Arc::new(RsyncSshInCluster),
        Arc::new(RsyncSshCrossCluster),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::cluster::{ClusterOps, MockClusterOps, PvcInfo};
    use crate::request::{ClusterRef, MigrationRequest, PvcReference, RequestOptions};
    use crate::task::{MigrationTask, ResolvedPvc};

    pub fn idle_cluster() -> Arc<dyn ClusterOps> {
        Arc::new(MockClusterOps::new())
    }

    pub fn endpoint(
        context: &str,
        namespace: &str,
        claim: &str,
        cluster: Arc<dyn ClusterOps>,
        modes: &[&str],
        node: Option<&str>,
    ) -> ResolvedPvc {
        ResolvedPvc {
            reference: PvcReference::new(
                ClusterRef::new(None, Some(context.to_string())),
                namespace,
                claim,
            )
            .unwrap(),
            cluster,
            info: PvcInfo {
                namespace: namespace.to_string(),
                claim: claim.to_string(),
                access_modes: modes.iter().map(|m| m.to_string()).collect(),
                capacity: Some("1Gi".to_string()),
                mounted_node: node.map(str::to_string),
                topology: Default::default(),
            },
        }
    }

    pub fn task(source: ResolvedPvc, dest: ResolvedPvc, delete_extraneous: bool) -> MigrationTask {
        let request = MigrationRequest::new(
            source.reference.clone(),
            dest.reference.clone(),
            RequestOptions::new(delete_extraneous),
        );
        MigrationTask::new(request, source, dest)
    }
}
