//! Fixtures for live-cluster tests

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Container, Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, Secret, Service, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use pv_migrate_engine::AttemptId;

const HELPER_IMAGE: &str = "docker.io/library/busybox:1.36";
const POD_TIMEOUT: Duration = Duration::from_secs(180);

/// Connect with the current kubeconfig context
pub async fn ensure_test_cluster() -> Result<Client, String> {
    Client::try_default()
        .await
        .map_err(|e| format!("no usable cluster in the current context: {}", e))
}

/// A namespace created for one test, deleted by [`TestNamespace::cleanup`]
pub struct TestNamespace {
    client: Client,
    pub name: String,
}

impl TestNamespace {
    pub async fn create(client: &Client, prefix: &str) -> Self {
        let name = format!("{}-{}", prefix, AttemptId::generate());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        Api::<Namespace>::all(client.clone())
            .create(&PostParams::default(), &namespace)
            .await
            .expect("failed to create namespace");

        Self {
            client: client.clone(),
            name,
        }
    }

    /// Create a small ReadWriteOnce claim
    pub async fn create_claim(&self, claim: &str) {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(claim.to_string()),
                namespace: Some(self.name.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity("64Mi".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), &self.name)
            .create(&PostParams::default(), &pvc)
            .await
            .expect("failed to create claim");
    }

    /// Run `script` in a pod with `claim` mounted at `/data` and return its
    /// log once it exits successfully
    pub async fn run_with_claim(&self, claim: &str, script: &str) -> String {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.name);
        let name = format!("helper-{}", AttemptId::generate());
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.name.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: "helper".to_string(),
                    image: Some(HELPER_IMAGE.to_string()),
                    command: Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: "data".to_string(),
                        mount_path: "/data".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: "data".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.to_string(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        pods.create(&PostParams::default(), &pod)
            .await
            .expect("failed to create helper pod");

        let deadline = tokio::time::Instant::now() + POD_TIMEOUT;
        loop {
            let phase = pods
                .get(&name)
                .await
                .expect("failed to get helper pod")
                .status
                .and_then(|s| s.phase);
            match phase.as_deref() {
                Some("Succeeded") => break,
                Some("Failed") => panic!("helper pod {} failed", name),
                _ if tokio::time::Instant::now() > deadline => {
                    panic!("helper pod {} did not finish", name)
                }
                _ => tokio::time::sleep(Duration::from_secs(2)).await,
            }
        }

        let logs = pods
            .logs(&name, &LogParams::default())
            .await
            .expect("failed to read helper logs");
        let _ = pods.delete(&name, &DeleteParams::default()).await;
        logs
    }

    /// Pods, services and secrets labelled as pv-migrate objects and not
    /// already being deleted
    pub async fn leftover_objects(&self) -> usize {
        let params = ListParams::default().labels("app.kubernetes.io/managed-by=pv-migrate");
        let live = |meta: &ObjectMeta| meta.deletion_timestamp.is_none();

        let pods = Api::<Pod>::namespaced(self.client.clone(), &self.name)
            .list(&params)
            .await
            .expect("failed to list pods");
        let services = Api::<Service>::namespaced(self.client.clone(), &self.name)
            .list(&params)
            .await
            .expect("failed to list services");
        let secrets = Api::<Secret>::namespaced(self.client.clone(), &self.name)
            .list(&params)
            .await
            .expect("failed to list secrets");

        pods.items.iter().filter(|o| live(&o.metadata)).count()
            + services.items.iter().filter(|o| live(&o.metadata)).count()
            + secrets.items.iter().filter(|o| live(&o.metadata)).count()
    }

    pub async fn cleanup(self) {
        let _ = Api::<Namespace>::all(self.client)
            .delete(&self.name, &DeleteParams::default())
            .await;
    }
}
