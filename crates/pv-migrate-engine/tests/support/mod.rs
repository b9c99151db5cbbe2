//! In-memory cluster for scenario tests
//!
//! Tracks every pod, service and secret so tests can assert that nothing
//! outlives a migration attempt.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::ResourceExt;
use pv_migrate_common::Error;
use pv_migrate_engine::{
    ClusterConnector, ClusterOps, ClusterRef, MemorySink, MigrationRequest, MigrationSettings,
    PvcInfo, PvcReference, RequestOptions, RunContext, ACCESS_MODE_RWO,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Key = (String, String);
type Pick = fn(&mut State) -> &mut BTreeSet<Key>;

#[derive(Default)]
struct State {
    pods: BTreeSet<Key>,
    services: BTreeSet<Key>,
    secrets: BTreeSet<Key>,
    created: usize,
    execs: Vec<(String, Vec<String>)>,
}

/// A cluster that keeps objects in memory and runs no containers
#[derive(Default)]
pub struct FakeCluster {
    pvcs: Mutex<HashMap<Key, PvcInfo>>,
    state: Mutex<State>,
    exit_codes: Mutex<VecDeque<i32>>,
    load_balancer: Mutex<Option<String>>,
    cancel_on_exec: Mutex<Option<CancellationToken>>,
    failing_deletes: Mutex<bool>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an unmounted ReadWriteOnce claim
    pub fn with_claim(self: Arc<Self>, namespace: &str, claim: &str) -> Arc<Self> {
        self.register(namespace, claim, None);
        self
    }

    /// Register a ReadWriteOnce claim that a workload on `node` mounts
    pub fn with_mounted_claim(
        self: Arc<Self>,
        namespace: &str,
        claim: &str,
        node: &str,
    ) -> Arc<Self> {
        self.register(namespace, claim, Some(node));
        self
    }

    fn register(&self, namespace: &str, claim: &str, node: Option<&str>) {
        self.pvcs.lock().unwrap().insert(
            (namespace.to_string(), claim.to_string()),
            PvcInfo {
                namespace: namespace.to_string(),
                claim: claim.to_string(),
                access_modes: vec![ACCESS_MODE_RWO.to_string()],
                capacity: Some("1Gi".to_string()),
                mounted_node: node.map(str::to_string),
                ..Default::default()
            },
        );
    }

    /// Exit codes returned by successive execs; 0 once exhausted
    pub fn with_exit_codes(self: Arc<Self>, codes: &[i32]) -> Arc<Self> {
        self.exit_codes.lock().unwrap().extend(codes);
        self
    }

    /// Address published for every LoadBalancer service
    pub fn with_load_balancer(self: Arc<Self>, address: &str) -> Arc<Self> {
        *self.load_balancer.lock().unwrap() = Some(address.to_string());
        self
    }

    /// Fire `token` from inside the next exec and never finish it
    pub fn cancelling_on_exec(self: Arc<Self>, token: CancellationToken) -> Arc<Self> {
        *self.cancel_on_exec.lock().unwrap() = Some(token);
        self
    }

    /// Make every delete fail
    pub fn with_failing_deletes(self: Arc<Self>) -> Arc<Self> {
        *self.failing_deletes.lock().unwrap() = true;
        self
    }

    /// Objects currently alive
    pub fn live_resources(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pods.len() + state.services.len() + state.secrets.len()
    }

    /// Objects ever created
    pub fn created_resources(&self) -> usize {
        self.state.lock().unwrap().created
    }

    /// Commands run so far with the pod they ran in
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().execs.clone()
    }

    fn insert(&self, pick: Pick, namespace: String, name: String) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !pick(&mut state).insert((namespace.clone(), name.clone())) {
            return Err(Error::validation(format!("{}/{} already exists", namespace, name)));
        }
        state.created += 1;
        Ok(())
    }

    fn remove(&self, pick: Pick, namespace: &str, name: &str) -> Result<(), Error> {
        if *self.failing_deletes.lock().unwrap() {
            return Err(Error::internal("apiserver unavailable"));
        }
        let mut state = self.state.lock().unwrap();
        pick(&mut state).remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn pvc_info(&self, namespace: &str, claim: &str) -> Result<PvcInfo, Error> {
        self.pvcs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), claim.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found("PersistentVolumeClaim", namespace, claim))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), Error> {
        self.insert(|s| &mut s.pods, pod.namespace().unwrap_or_default(), pod.name_any())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.remove(|s| &mut s.pods, namespace, name)
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.insert(
            |s| &mut s.services,
            service.namespace().unwrap_or_default(),
            service.name_any(),
        )
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.remove(|s| &mut s.services, namespace, name)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.insert(
            |s| &mut s.secrets,
            secret.namespace().unwrap_or_default(),
            secret.name_any(),
        )
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.remove(|s| &mut s.secrets, namespace, name)
    }

    async fn wait_pod_ready(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let exists = self
            .state
            .lock()
            .unwrap()
            .pods
            .contains(&(namespace.to_string(), name.to_string()));
        if exists {
            Ok(())
        } else {
            Err(Error::not_found("Pod", namespace, name))
        }
    }

    async fn wait_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<String, Error> {
        self.load_balancer.lock().unwrap().clone().ok_or_else(|| {
            Error::timeout(
                format!("load balancer address for service {}/{}", namespace, name),
                timeout,
            )
        })
    }

    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        _container: &str,
        command: Vec<String>,
        output: mpsc::Sender<String>,
    ) -> Result<i32, Error> {
        self.state
            .lock()
            .unwrap()
            .execs
            .push((pod.to_string(), command));

        let _ = output.send("sending incremental file list".to_string()).await;

        let cancel = self.cancel_on_exec.lock().unwrap().take();
        if let Some(token) = cancel {
            token.cancel();
            std::future::pending::<()>().await;
        }

        let code = self.exit_codes.lock().unwrap().pop_front().unwrap_or(0);
        if code == 0 {
            let _ = output.send("total size is 4.0K  speedup is 1.00".to_string()).await;
        }
        Ok(code)
    }
}

/// Connector handing out fixed fake clusters by context name
#[derive(Default)]
pub struct FakeConnector {
    clusters: HashMap<ClusterRef, Arc<FakeCluster>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, context: &str, cluster: Arc<FakeCluster>) -> Self {
        self.clusters.insert(cluster_ref(context), cluster);
        self
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterOps>, Error> {
        match self.clusters.get(cluster) {
            Some(fake) => Ok(fake.clone()),
            None => Err(Error::internal_with_context(
                "connect",
                format!("no such context {}", cluster),
            )),
        }
    }
}

pub fn cluster_ref(context: &str) -> ClusterRef {
    ClusterRef::new(None, Some(context.to_string()))
}

pub fn request(
    source: (&str, &str, &str),
    dest: (&str, &str, &str),
    delete_extraneous: bool,
) -> MigrationRequest {
    MigrationRequest::new(
        PvcReference::new(cluster_ref(source.0), source.1, source.2).unwrap(),
        PvcReference::new(cluster_ref(dest.0), dest.1, dest.2).unwrap(),
        RequestOptions::new(delete_extraneous),
    )
}

pub fn context(sink: Arc<MemorySink>) -> RunContext {
    RunContext::new(sink).with_settings(MigrationSettings {
        transfer_retry_delay: Duration::from_millis(1),
        ..Default::default()
    })
}
