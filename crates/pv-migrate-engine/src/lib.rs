//! Copy the contents of one PersistentVolumeClaim into another
//!
//! The engine tries a chain of strategies in order, from cheapest to most
//! general, and stops at the first one that succeeds. Each strategy creates
//! short-lived pods, services and secrets, runs rsync, and deletes everything
//! it created whatever the outcome.
//!
//! ## Flow
//!
//! ```text
//! MigrationRequest
//!   │ validate override
//!   ▼
//! MigrationTask::resolve ── ClusterConnector ──► ClusterOps (per cluster)
//!   │                                              └─ pvc_info: modes, node
//!   ▼
//! Engine: for each candidate strategy
//!   ├─ can_attempt? no ──► StrategySkipped
//!   └─ migrate
//!        ├─ TransientResources: secrets, pods, services
//!        ├─ wait ready (and load balancer)
//!        ├─ exec rsync, stream output to the EventSink
//!        └─ release: teardown newest first
//!   first Ok ──► MigrationOutcome
//!   none left ──► NoApplicableStrategy / AllStrategiesFailed
//! ```
//!
//! ## Strategies
//!
//! - **mount-both**: one pod mounts both claims; same namespace only.
//! - **rsync-ssh-in-cluster**: sshd on the destination behind a ClusterIP
//!   service, rsync client on the source.
//! - **rsync-ssh-cross-cluster**: the same over a LoadBalancer service; works
//!   for any topology.

#![deny(missing_docs)]

mod cluster;
mod context;
mod engine;
mod error;
mod events;
mod kube_cluster;
pub mod manifests;
mod request;
mod resources;
pub mod rsync;
mod settings;
mod ssh;
pub mod strategy;
mod task;
mod transfer;

pub use cluster::{
    ClusterConnector, ClusterOps, PvcInfo, VolumeTopology, ACCESS_MODE_ROX, ACCESS_MODE_RWO,
    ACCESS_MODE_RWX, LABEL_HOSTNAME, TOPOLOGY_ZONE,
};
pub use context::RunContext;
pub use engine::{Engine, MigrationOutcome};
pub use error::{FailureKind, MigrationError, Phase, Side, StrategyError, StrategyFailure};
pub use events::{EventSink, MemorySink, MigrationEvent, TracingSink};
pub use kube_cluster::{KubeCluster, KubeConnector};
pub use request::{ClusterRef, MigrationRequest, PvcReference, RequestOptions};
pub use resources::{AttemptId, ResourceKind, TransientResources};
pub use settings::{
    MigrationSettings, DEFAULT_LOAD_BALANCER_TIMEOUT, DEFAULT_READY_TIMEOUT, DEFAULT_RSYNC_IMAGE,
    DEFAULT_SSHD_IMAGE, DEFAULT_TRANSFER_ATTEMPTS, SSHD_CONTAINER_PORT,
};
pub use ssh::SshKeyPair;
pub use strategy::{
    default_strategies, AttemptReport, MountBoth, RsyncSshCrossCluster, RsyncSshInCluster,
    Strategy,
};
pub use task::{MigrationTask, ResolvedPvc};
pub use transfer::LineSplitter;
