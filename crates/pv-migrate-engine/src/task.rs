//! Requests resolved against their clusters

use std::sync::Arc;

use tracing::debug;

use crate::cluster::{ClusterConnector, ClusterOps, PvcInfo};
use crate::context::RunContext;
use crate::error::{MigrationError, Side};
use crate::request::{MigrationRequest, PvcReference};

/// One endpoint with its cluster handle and what the cluster reported
#[derive(Clone)]
pub struct ResolvedPvc {
    /// The endpoint as requested
    pub reference: PvcReference,
    /// Cluster the claim lives in
    pub cluster: Arc<dyn ClusterOps>,
    /// Claim details at resolution time
    pub info: PvcInfo,
}

impl ResolvedPvc {
    /// Namespace of the claim
    pub fn namespace(&self) -> &str {
        self.reference.namespace()
    }

    /// Claim name
    pub fn claim(&self) -> &str {
        self.reference.claim()
    }
}

/// A request plus everything strategies need to decide and act on it
#[derive(Clone)]
pub struct MigrationTask {
    request: MigrationRequest,
    source: ResolvedPvc,
    dest: ResolvedPvc,
}

impl MigrationTask {
    /// Assemble a task from already resolved endpoints
    pub fn new(request: MigrationRequest, source: ResolvedPvc, dest: ResolvedPvc) -> Self {
        Self {
            request,
            source,
            dest,
        }
    }

    /// Connect to both clusters and look up both claims
    ///
    /// Endpoints that share a [`ClusterRef`](crate::ClusterRef) share one
    /// cluster handle.
    pub async fn resolve(
        request: MigrationRequest,
        connector: &dyn ClusterConnector,
        ctx: &RunContext,
    ) -> Result<Self, MigrationError> {
        let source_cluster = connect(connector, request.source(), Side::Source, ctx).await?;
        let dest_cluster = if request.dest().cluster() == request.source().cluster() {
            source_cluster.clone()
        } else {
            connect(connector, request.dest(), Side::Dest, ctx).await?
        };

        let source = lookup(source_cluster, request.source(), Side::Source, ctx).await?;
        let dest = lookup(dest_cluster, request.dest(), Side::Dest, ctx).await?;

        debug!(
            source_modes = ?source.info.access_modes,
            source_node = ?source.info.mounted_node,
            dest_modes = ?dest.info.access_modes,
            dest_node = ?dest.info.mounted_node,
            "Resolved migration endpoints"
        );

        Ok(Self::new(request, source, dest))
    }

    /// The request this task was resolved from
    pub fn request(&self) -> &MigrationRequest {
        &self.request
    }

    /// Source endpoint
    pub fn source(&self) -> &ResolvedPvc {
        &self.source
    }

    /// Destination endpoint
    pub fn dest(&self) -> &ResolvedPvc {
        &self.dest
    }

    /// Whether `--delete` should be passed to rsync
    pub fn delete_extraneous(&self) -> bool {
        self.request.options().delete_extraneous()
    }

    /// Both endpoints are reached through the same cluster reference
    pub fn same_cluster(&self) -> bool {
        self.source.reference.cluster() == self.dest.reference.cluster()
    }

    /// Same cluster and same namespace
    pub fn same_namespace(&self) -> bool {
        self.same_cluster() && self.source.namespace() == self.dest.namespace()
    }

    /// Source and destination are the very same claim
    pub fn same_claim(&self) -> bool {
        self.same_namespace() && self.source.claim() == self.dest.claim()
    }
}

fn resolution_error(side: Side, pvc: &PvcReference, message: impl Into<String>) -> MigrationError {
    MigrationError::Resolution {
        side,
        claim: format!("{}/{}", pvc.namespace(), pvc.claim()),
        message: message.into(),
    }
}

async fn connect(
    connector: &dyn ClusterConnector,
    pvc: &PvcReference,
    side: Side,
    ctx: &RunContext,
) -> Result<Arc<dyn ClusterOps>, MigrationError> {
    tokio::select! {
        biased;
        _ = ctx.cancel().cancelled() => Err(MigrationError::Cancelled { strategy: None }),
        result = connector.connect(pvc.cluster()) => result.map_err(|e| {
            let message = format!("cannot connect to cluster {}: {}", pvc.cluster(), e);
            resolution_error(side, pvc, message)
        }),
    }
}

async fn lookup(
    cluster: Arc<dyn ClusterOps>,
    pvc: &PvcReference,
    side: Side,
    ctx: &RunContext,
) -> Result<ResolvedPvc, MigrationError> {
    let info = tokio::select! {
        biased;
        _ = ctx.cancel().cancelled() => return Err(MigrationError::Cancelled { strategy: None }),
        result = cluster.pvc_info(pvc.namespace(), pvc.claim()) => {
            result.map_err(|e| resolution_error(side, pvc, e.to_string()))?
        }
    };

    Ok(ResolvedPvc {
        reference: pvc.clone(),
        cluster,
        info,
    })
}
