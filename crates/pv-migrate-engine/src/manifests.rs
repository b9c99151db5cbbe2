//! Builders for the transient pods, services and secrets
//!
//! Every object carries the attempt's labels so a leaked object can be
//! traced back to the run that created it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Secret,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use pv_migrate_common::{LABEL_ATTEMPT, LABEL_COMPONENT};

use crate::resources::AttemptId;
use crate::settings::SSHD_CONTAINER_PORT;

/// Where the source claim is mounted, always read-only
pub const SOURCE_MOUNT_PATH: &str = "/source";
/// Where the destination claim is mounted
pub const DEST_MOUNT_PATH: &str = "/dest";
/// Directory holding the client's private key
pub const SSH_KEY_DIR: &str = "/etc/pv-migrate/ssh";
/// Secret key (and file name) of the client's private key
pub const PRIVATE_KEY_FILE: &str = "id_ed25519";
/// Secret key (and file name) of the server's authorized keys
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";
/// Where sshd reads root's authorized keys; only the file is mounted so the
/// image's `/root/.ssh` keeps the mode sshd insists on
const AUTHORIZED_KEYS_PATH: &str = "/root/.ssh/authorized_keys";
/// Container name of every rsync-running pod
pub const RSYNC_CONTAINER: &str = "rsync";
/// Container name of the sshd pod
pub const SSHD_CONTAINER: &str = "sshd";

/// Role of the pod running rsync
pub const ROLE_RSYNC: &str = "rsync";
/// Role of the sshd pod and its service
pub const ROLE_SSHD: &str = "sshd";
/// Role of the secret with the client private key
pub const ROLE_CLIENT_KEY: &str = "ssh-key";
/// Role of the secret with the server's authorized keys
pub const ROLE_AUTHORIZED_KEYS: &str = "authorized-keys";

const SOURCE_VOLUME: &str = "source";
const DEST_VOLUME: &str = "dest";
const KEY_VOLUME: &str = "ssh-key";
const AUTHORIZED_KEYS_VOLUME: &str = "authorized-keys";

/// Full path of the private key inside rsync client pods
pub fn private_key_path() -> String {
    format!("{}/{}", SSH_KEY_DIR, PRIVATE_KEY_FILE)
}

/// Keeps a container alive until it is deleted; rsync runs via exec
pub fn idle_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "trap 'exit 0' TERM; while true; do sleep 1; done".to_string(),
    ]
}

fn metadata(attempt: &AttemptId, namespace: &str, role: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(attempt.resource_name(role)),
        namespace: Some(namespace.to_string()),
        labels: Some(attempt.labels(role)),
        ..Default::default()
    }
}

fn claim_volume(name: &str, claim: &str, read_only: bool) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: Some(read_only),
        }),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str, mode: i32) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            default_mode: Some(mode),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(volume: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn pod(
    metadata: ObjectMeta,
    node: Option<&str>,
    container: Container,
    volumes: Vec<Volume>,
) -> Pod {
    Pod {
        metadata,
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            node_name: node.map(str::to_string),
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single pod mounting both claims, source read-only
pub fn mount_both_pod(
    attempt: &AttemptId,
    namespace: &str,
    source_claim: &str,
    dest_claim: &str,
    node: Option<&str>,
    image: &str,
) -> Pod {
    let container = Container {
        name: RSYNC_CONTAINER.to_string(),
        image: Some(image.to_string()),
        command: Some(idle_command()),
        volume_mounts: Some(vec![
            mount(SOURCE_VOLUME, SOURCE_MOUNT_PATH, true),
            mount(DEST_VOLUME, DEST_MOUNT_PATH, false),
        ]),
        ..Default::default()
    };

    pod(
        metadata(attempt, namespace, ROLE_RSYNC),
        node,
        container,
        vec![
            claim_volume(SOURCE_VOLUME, source_claim, true),
            claim_volume(DEST_VOLUME, dest_claim, false),
        ],
    )
}

/// Pod mounting the source claim read-only, optionally with the client
/// private key from `key_secret`
pub fn idle_rsync_pod(
    attempt: &AttemptId,
    namespace: &str,
    source_claim: &str,
    node: Option<&str>,
    image: &str,
    key_secret: Option<&str>,
) -> Pod {
    let mut mounts = vec![mount(SOURCE_VOLUME, SOURCE_MOUNT_PATH, true)];
    let mut volumes = vec![claim_volume(SOURCE_VOLUME, source_claim, true)];

    if let Some(secret) = key_secret {
        mounts.push(mount(KEY_VOLUME, SSH_KEY_DIR, true));
        volumes.push(secret_volume(KEY_VOLUME, secret, 0o400));
    }

    let container = Container {
        name: RSYNC_CONTAINER.to_string(),
        image: Some(image.to_string()),
        command: Some(idle_command()),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    pod(
        metadata(attempt, namespace, ROLE_RSYNC),
        node,
        container,
        volumes,
    )
}

/// sshd pod mounting the destination claim and trusting the keys in
/// `authorized_keys_secret`
pub fn sshd_pod(
    attempt: &AttemptId,
    namespace: &str,
    dest_claim: &str,
    node: Option<&str>,
    image: &str,
    authorized_keys_secret: &str,
) -> Pod {
    let container = Container {
        name: SSHD_CONTAINER.to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("ssh".to_string()),
            container_port: SSHD_CONTAINER_PORT as i32,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            mount(DEST_VOLUME, DEST_MOUNT_PATH, false),
            VolumeMount {
                sub_path: Some(AUTHORIZED_KEYS_FILE.to_string()),
                ..mount(AUTHORIZED_KEYS_VOLUME, AUTHORIZED_KEYS_PATH, true)
            },
        ]),
        ..Default::default()
    };

    pod(
        metadata(attempt, namespace, ROLE_SSHD),
        node,
        container,
        vec![
            claim_volume(DEST_VOLUME, dest_claim, false),
            secret_volume(AUTHORIZED_KEYS_VOLUME, authorized_keys_secret, 0o644),
        ],
    )
}

/// How the sshd service is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExposure {
    /// Cluster-internal virtual IP
    ClusterIp,
    /// External load balancer
    LoadBalancer,
}

impl ServiceExposure {
    fn service_type(&self) -> &'static str {
        match self {
            ServiceExposure::ClusterIp => "ClusterIP",
            ServiceExposure::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Service in front of the attempt's sshd pod
pub fn sshd_service(
    attempt: &AttemptId,
    namespace: &str,
    port: u16,
    exposure: ServiceExposure,
) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert(LABEL_ATTEMPT.to_string(), attempt.as_str().to_string());
    selector.insert(LABEL_COMPONENT.to_string(), ROLE_SSHD.to_string());

    Service {
        metadata: metadata(attempt, namespace, ROLE_SSHD),
        spec: Some(ServiceSpec {
            type_: Some(exposure.service_type().to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("ssh".to_string()),
                port: port as i32,
                target_port: Some(IntOrString::Int(SSHD_CONTAINER_PORT as i32)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Opaque secret holding a single key
pub fn key_secret(
    attempt: &AttemptId,
    namespace: &str,
    role: &str,
    key: &str,
    value: &str,
) -> Secret {
    Secret {
        metadata: metadata(attempt, namespace, role),
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
        ..Default::default()
    }
}
