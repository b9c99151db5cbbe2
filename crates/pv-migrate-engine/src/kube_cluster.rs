//! [`ClusterOps`] backed by a real cluster through kube-rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use pv_migrate_common::kube_utils::{
    create_client, is_not_found_error, pod_readiness, poll_until, PodReadiness,
    DEFAULT_POLL_INTERVAL,
};
use pv_migrate_common::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_PV_MIGRATE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterConnector, ClusterOps, PvcInfo, VolumeTopology, TOPOLOGY_ZONE};
use crate::request::ClusterRef;
use crate::transfer::LineSplitter;

/// One cluster reached through a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    poll_interval: Duration,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a client from the reference's kubeconfig and context
    pub async fn connect(cluster: &ClusterRef) -> Result<Self, Error> {
        let client = create_client(cluster.kubeconfig(), cluster.context()).await?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Delete through `api`, treating an already missing object as deleted
async fn delete_ignoring_missing<K>(api: Api<K>, name: &str) -> Result<(), Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found_error(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Node of a running pod, not created by us, that mounts `claim`
fn mounted_node(pods: &[Pod], claim: &str) -> Option<String> {
    pods.iter()
        .filter(|pod| {
            pod.labels().get(LABEL_MANAGED_BY).map(String::as_str)
                != Some(LABEL_MANAGED_BY_PV_MIGRATE)
        })
        .filter(|pod| {
            !matches!(
                pod.status.as_ref().and_then(|s| s.phase.as_deref()),
                Some("Succeeded") | Some("Failed")
            )
        })
        .filter(|pod| {
            pod.spec
                .as_ref()
                .and_then(|spec| spec.volumes.as_ref())
                .is_some_and(|volumes| {
                    volumes.iter().any(|v| {
                        v.persistent_volume_claim
                            .as_ref()
                            .is_some_and(|pvc| pvc.claim_name == claim)
                    })
                })
        })
        .find_map(|pod| pod.spec.as_ref().and_then(|spec| spec.node_name.clone()))
}

/// Reject claims no pod could mount
fn check_claim_usable(pvc: &PersistentVolumeClaim) -> Result<(), Error> {
    let name = format!("{}/{}", pvc.namespace().unwrap_or_default(), pvc.name_any());
    if pvc.metadata.deletion_timestamp.is_some() {
        return Err(Error::validation(format!("claim {} is being deleted", name)));
    }
    if pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Lost") {
        return Err(Error::validation(format!(
            "claim {} lost its persistent volume",
            name
        )));
    }
    Ok(())
}

/// Node labels the volume's node affinity and zone label restrict pods to
fn volume_topology(pv: &PersistentVolume) -> VolumeTopology {
    let terms: Vec<Vec<(String, Vec<String>)>> = pv
        .spec
        .as_ref()
        .and_then(|spec| spec.node_affinity.as_ref())
        .and_then(|affinity| affinity.required.as_ref())
        .map(|selector| {
            selector
                .node_selector_terms
                .iter()
                .map(|term| {
                    term.match_expressions
                        .iter()
                        .flatten()
                        .filter(|req| req.operator == "In")
                        .map(|req| (req.key.clone(), req.values.clone().unwrap_or_default()))
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    let mut topology = VolumeTopology::from_terms(&terms);
    if let Some(zone) = pv.labels().get(TOPOLOGY_ZONE) {
        topology.constrain(TOPOLOGY_ZONE, [zone.as_str()]);
    }
    topology
}

/// Exit code from the status kube-rs reports at the end of an exec
///
/// The API server reports `Success`, or `Failure` with an `ExitCode` cause
/// whose message is the code.
fn exit_code(status: Option<Status>) -> Result<i32, Error> {
    let Some(status) = status else {
        return Err(Error::internal_with_context(
            "exec",
            "stream closed without exit status",
        ));
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }

    let code = status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.trim().parse::<i32>().ok());

    code.ok_or_else(|| {
        Error::internal_with_context(
            "exec",
            status
                .message
                .unwrap_or_else(|| "command failed without exit code".to_string()),
        )
    })
}

/// Forward `reader` to `output` one line at a time
async fn forward_lines<R>(reader: Option<R>, output: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut splitter = LineSplitter::default();
    let mut buf = vec![0u8; 4096];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if output.send(line).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Exec stream read error");
                break;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        let _ = output.send(line).await;
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn pvc_info(&self, namespace: &str, claim: &str) -> Result<PvcInfo, Error> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let pvc = pvcs
            .get_opt(claim)
            .await?
            .ok_or_else(|| Error::not_found("PersistentVolumeClaim", namespace, claim))?;
        check_claim_usable(&pvc)?;

        let access_modes = pvc
            .spec
            .as_ref()
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default();
        let capacity = pvc
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .map(|q| q.0.clone());

        let pods = self.pods(namespace).list(&ListParams::default()).await?;
        let mounted_node = mounted_node(&pods.items, claim);

        let volume_name = pvc.spec.as_ref().and_then(|s| s.volume_name.clone());
        let topology = match volume_name {
            Some(volume) => {
                match Api::<PersistentVolume>::all(self.client.clone())
                    .get_opt(&volume)
                    .await
                {
                    Ok(Some(pv)) => volume_topology(&pv),
                    Ok(None) => VolumeTopology::default(),
                    Err(e) => {
                        warn!(volume = %volume, error = %e, "Cannot read volume topology");
                        VolumeTopology::default()
                    }
                }
            }
            None => VolumeTopology::default(),
        };
        debug!(claim = %claim, ?topology, "Resolved claim");

        Ok(PvcInfo {
            namespace: namespace.to_string(),
            claim: claim.to_string(),
            access_modes,
            capacity,
            mounted_node,
            topology,
        })
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), Error> {
        let namespace = pod.namespace().unwrap_or_default();
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        delete_ignoring_missing(self.pods(namespace), name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service.namespace().unwrap_or_default();
        self.services(&namespace)
            .create(&PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        delete_ignoring_missing(self.services(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret.namespace().unwrap_or_default();
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        delete_ignoring_missing(self.secrets(namespace), name).await
    }

    async fn wait_pod_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let api = self.pods(namespace);
        poll_until(
            timeout,
            self.poll_interval,
            format!("pod {}/{} to become ready", namespace, name),
            cancel,
            || {
                let api = api.clone();
                async move {
                    let pod = api
                        .get_opt(name)
                        .await?
                        .ok_or_else(|| Error::not_found("Pod", namespace, name))?;
                    match pod_readiness(&pod) {
                        PodReadiness::Ready => Ok(true),
                        PodReadiness::Starting => Ok(false),
                        PodReadiness::Terminated(reason) => Err(Error::PodTerminated {
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                            reason,
                        }),
                        PodReadiness::Unschedulable(reason) => Err(Error::PodUnschedulable {
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                            reason,
                        }),
                    }
                }
            },
        )
        .await
    }

    async fn wait_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let api = self.services(namespace);
        let address = |svc: &Service| {
            svc.status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| ingress.first())
                .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()))
        };

        poll_until(
            timeout,
            self.poll_interval,
            format!("load balancer address for service {}/{}", namespace, name),
            cancel,
            || {
                let api = api.clone();
                async move {
                    let svc = api
                        .get_opt(name)
                        .await?
                        .ok_or_else(|| Error::not_found("Service", namespace, name))?;
                    Ok::<_, Error>(address(&svc).is_some())
                }
            },
        )
        .await?;

        let svc = api.get(name).await?;
        let host = address(&svc).ok_or_else(|| {
            Error::internal_with_context("wait_load_balancer", "ingress address disappeared")
        })?;
        info!(namespace = %namespace, service = %name, address = %host, "Load balancer is ready");
        Ok(host)
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        output: mpsc::Sender<String>,
    ) -> Result<i32, Error> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        debug!(namespace = %namespace, pod = %pod, command = ?command, "Exec");
        let mut attached = self.pods(namespace).exec(pod, command, &params).await?;

        let status = attached.take_status();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        tokio::join!(
            forward_lines(stdout, output.clone()),
            forward_lines(stderr, output),
        );

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        exit_code(status)
    }
}

/// Connects to clusters through kubeconfig, reusing one client per
/// distinct [`ClusterRef`]
#[derive(Default)]
pub struct KubeConnector {
    clusters: Mutex<HashMap<ClusterRef, Arc<KubeCluster>>>,
}

impl KubeConnector {
    /// Connector with no cached clients
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterOps>, Error> {
        let mut clusters = self.clusters.lock().await;
        if let Some(existing) = clusters.get(cluster) {
            return Ok(existing.clone());
        }

        debug!(cluster = %cluster, "Creating kube client");
        let connected = Arc::new(KubeCluster::connect(cluster).await?);
        clusters.insert(cluster.clone(), connected.clone());
        Ok(connected)
    }
}
