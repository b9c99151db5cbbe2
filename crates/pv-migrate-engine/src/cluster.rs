//! Cluster-side collaborator traits
//!
//! Strategies never talk to the Kubernetes API directly. They go through
//! [`ClusterOps`], which lets tests drive every strategy against an
//! in-memory cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use pv_migrate_common::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use crate::request::ClusterRef;

/// ReadWriteOnce access mode
pub const ACCESS_MODE_RWO: &str = "ReadWriteOnce";
/// ReadOnlyMany access mode
pub const ACCESS_MODE_ROX: &str = "ReadOnlyMany";
/// ReadWriteMany access mode
pub const ACCESS_MODE_RWX: &str = "ReadWriteMany";

/// Well-known node label carrying the zone
pub const TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";
/// Well-known node label carrying the node name
pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

/// Node labels a volume restricts its consumers to
///
/// Each key maps to the values a node must carry for that label. A key that
/// is absent places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeTopology {
    constraints: BTreeMap<String, BTreeSet<String>>,
}

impl VolumeTopology {
    /// Topology from node selector terms given as `(key, values)` `In`
    /// requirements
    ///
    /// Requirements within a term must all hold, while any one term may
    /// match. Only keys every term constrains survive, with the union of
    /// their values.
    pub fn from_terms(terms: &[Vec<(String, Vec<String>)>]) -> Self {
        let mut per_term: Vec<BTreeMap<String, BTreeSet<String>>> = Vec::new();
        for term in terms {
            let mut constraints: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for (key, values) in term {
                let allowed: BTreeSet<String> = values.iter().cloned().collect();
                constraints
                    .entry(key.clone())
                    .and_modify(|existing| {
                        *existing = existing.intersection(&allowed).cloned().collect()
                    })
                    .or_insert(allowed);
            }
            per_term.push(constraints);
        }

        let Some((first, rest)) = per_term.split_first() else {
            return Self::default();
        };
        let mut constraints = BTreeMap::new();
        for (key, values) in first {
            if !rest.iter().all(|term| term.contains_key(key)) {
                continue;
            }
            let mut union = values.clone();
            for term in rest {
                union.extend(term[key].iter().cloned());
            }
            constraints.insert(key.clone(), union);
        }
        Self { constraints }
    }

    /// Restrict `key` to `values`, intersecting with any existing restriction
    pub fn constrain<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.constraints
            .entry(key.to_string())
            .and_modify(|existing| *existing = existing.intersection(&values).cloned().collect())
            .or_insert(values);
    }

    /// Values allowed for `key`, or `None` when unrestricted
    pub fn allowed(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.constraints.get(key)
    }

    /// Whether some node could satisfy both topologies
    pub fn compatible_with(&self, other: &VolumeTopology) -> bool {
        self.constraints.iter().all(|(key, values)| {
            other
                .constraints
                .get(key)
                .map_or(true, |theirs| !values.is_disjoint(theirs))
        })
    }

    /// Node the volume is local to, if it is restricted to exactly one
    pub fn node(&self) -> Option<&str> {
        let nodes = self.allowed(LABEL_HOSTNAME)?;
        match nodes.len() {
            1 => nodes.iter().next().map(String::as_str),
            _ => None,
        }
    }
}

/// What the cluster reports about a claim at resolution time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvcInfo {
    /// Namespace of the claim
    pub namespace: String,
    /// Claim name
    pub claim: String,
    /// Access modes from the claim spec
    pub access_modes: Vec<String>,
    /// Provisioned capacity, e.g. `10Gi`
    pub capacity: Option<String>,
    /// Node of a running pod that currently mounts the claim
    pub mounted_node: Option<String>,
    /// Placement restrictions of the bound volume
    pub topology: VolumeTopology,
}

impl PvcInfo {
    fn has_mode(&self, mode: &str) -> bool {
        self.access_modes.iter().any(|m| m == mode)
    }

    /// Whether pods on any node may mount the claim read-write
    pub fn supports_rwx(&self) -> bool {
        self.has_mode(ACCESS_MODE_RWX)
    }

    /// Whether pods on any node may mount the claim read-only
    pub fn supports_rox(&self) -> bool {
        self.has_mode(ACCESS_MODE_ROX)
    }

    /// Node a new pod has to run on to mount this claim, if any
    ///
    /// A node-local volume pins every pod to its node. A claim that nobody
    /// mounts can otherwise be attached anywhere. A mounted claim pins new
    /// pods to its node unless its access modes allow sharing.
    pub fn pinned_node(&self, read_only: bool) -> Option<&str> {
        if let Some(node) = self.topology.node() {
            return Some(node);
        }
        let node = self.mounted_node.as_deref()?;
        if self.supports_rwx() || (read_only && self.supports_rox()) {
            return None;
        }
        Some(node)
    }
}

/// Operations the strategies need from one cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Look up a claim and the node it is currently mounted on
    async fn pvc_info(&self, namespace: &str, claim: &str) -> Result<PvcInfo, Error>;

    /// Create a pod
    async fn create_pod(&self, pod: &Pod) -> Result<(), Error>;

    /// Delete a pod; a missing pod is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Delete a service; a missing service is not an error
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; a missing secret is not an error
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Wait until a pod reports ready
    async fn wait_pod_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;

    /// Wait until a `LoadBalancer` service has an ingress address
    async fn wait_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, Error>;

    /// Run a command in a pod container, sending each output line to
    /// `output`, and return its exit code
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        output: mpsc::Sender<String>,
    ) -> Result<i32, Error>;
}

/// Resolves cluster access parameters to a [`ClusterOps`] handle
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to the cluster described by `cluster`
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterOps>, Error>;
}
