//! Transient resource lifecycle
//!
//! Every pod, service and secret a strategy creates is registered with the
//! attempt's [`TransientResources`] *before* the create call, so an object
//! whose creation timed out is still cleaned up. [`TransientResources::release`]
//! deletes everything in reverse creation order and folds the teardown result
//! into the attempt outcome. If an attempt future is dropped before it gets
//! there, `Drop` spawns the same teardown onto the current runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::ResourceExt;
use pv_migrate_common::retry::{retry_with_backoff, RetryConfig};
use pv_migrate_common::{
    Error, LABEL_ATTEMPT, LABEL_COMPONENT, LABEL_MANAGED_BY, LABEL_MANAGED_BY_PV_MIGRATE,
    RESOURCE_NAME_PREFIX,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cluster::ClusterOps;
use crate::error::{Phase, StrategyError};
use crate::events::{EventSink, MigrationEvent};
use crate::strategy::AttemptReport;

/// Deletes are retried a few times before an object is reported as leaked
const TEARDOWN_ATTEMPTS: u32 = 3;
const TEARDOWN_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Kind of a transient object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Pod
    Pod,
    /// Service
    Service,
    /// Secret
    Secret,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pod => write!(f, "pod"),
            ResourceKind::Service => write!(f, "service"),
            ResourceKind::Secret => write!(f, "secret"),
        }
    }
}

/// Unique id of one strategy attempt, used in object names and labels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptId(String);

impl AttemptId {
    /// Generate a fresh id (8 hex characters)
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..8].to_string())
    }

    /// The id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object name for a role, e.g. `pv-migrate-1a2b3c4d-sshd`
    pub fn resource_name(&self, role: &str) -> String {
        format!("{}-{}-{}", RESOURCE_NAME_PREFIX, self.0, role)
    }

    /// Labels identifying an object created for `role` in this attempt
    pub fn labels(&self, role: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_PV_MIGRATE.to_string(),
            ),
            (LABEL_ATTEMPT.to_string(), self.0.clone()),
            (LABEL_COMPONENT.to_string(), role.to_string()),
        ])
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Tracked {
    kind: ResourceKind,
    namespace: String,
    name: String,
    cluster: Arc<dyn ClusterOps>,
}

impl Tracked {
    async fn delete(&self) -> Result<(), Error> {
        match self.kind {
            ResourceKind::Pod => self.cluster.delete_pod(&self.namespace, &self.name).await,
            ResourceKind::Service => {
                self.cluster
                    .delete_service(&self.namespace, &self.name)
                    .await
            }
            ResourceKind::Secret => {
                self.cluster
                    .delete_secret(&self.namespace, &self.name)
                    .await
            }
        }
    }
}

/// The set of transient objects owned by one strategy attempt
pub struct TransientResources {
    strategy: &'static str,
    attempt: AttemptId,
    sink: Arc<dyn EventSink>,
    tracked: Vec<Tracked>,
}

impl TransientResources {
    /// Empty set for a new attempt of `strategy`
    pub fn new(strategy: &'static str, sink: Arc<dyn EventSink>) -> Self {
        Self {
            strategy,
            attempt: AttemptId::generate(),
            sink,
            tracked: Vec::new(),
        }
    }

    /// Id of the owning attempt
    pub fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    /// Number of objects still owned
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether nothing is owned
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    fn track(
        &mut self,
        kind: ResourceKind,
        namespace: String,
        name: String,
        cluster: &Arc<dyn ClusterOps>,
    ) {
        self.tracked.push(Tracked {
            kind,
            namespace,
            name,
            cluster: cluster.clone(),
        });
    }

    fn created(&self, kind: ResourceKind, namespace: &str, name: &str) {
        self.sink.emit(MigrationEvent::ResourceCreated {
            strategy: self.strategy.to_string(),
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn create_failed(kind: ResourceKind, namespace: &str, name: &str, err: Error) -> StrategyError {
        if err.is_cancelled() {
            return StrategyError::Cancelled {
                phase: Phase::Provision,
            };
        }
        StrategyError::transfer(
            Phase::Provision,
            format!("failed to create {} {}/{}: {}", kind, namespace, name, err),
        )
    }

    /// Create a pod owned by this attempt
    pub async fn create_pod(
        &mut self,
        cluster: &Arc<dyn ClusterOps>,
        pod: &Pod,
    ) -> Result<(), StrategyError> {
        let (namespace, name) = (pod.namespace().unwrap_or_default(), pod.name_any());
        self.track(ResourceKind::Pod, namespace.clone(), name.clone(), cluster);
        cluster
            .create_pod(pod)
            .await
            .map_err(|e| Self::create_failed(ResourceKind::Pod, &namespace, &name, e))?;
        self.created(ResourceKind::Pod, &namespace, &name);
        Ok(())
    }

    /// Create a service owned by this attempt
    pub async fn create_service(
        &mut self,
        cluster: &Arc<dyn ClusterOps>,
        service: &Service,
    ) -> Result<(), StrategyError> {
        let (namespace, name) = (service.namespace().unwrap_or_default(), service.name_any());
        self.track(ResourceKind::Service, namespace.clone(), name.clone(), cluster);
        cluster
            .create_service(service)
            .await
            .map_err(|e| Self::create_failed(ResourceKind::Service, &namespace, &name, e))?;
        self.created(ResourceKind::Service, &namespace, &name);
        Ok(())
    }

    /// Create a secret owned by this attempt
    pub async fn create_secret(
        &mut self,
        cluster: &Arc<dyn ClusterOps>,
        secret: &Secret,
    ) -> Result<(), StrategyError> {
        let (namespace, name) = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.track(ResourceKind::Secret, namespace.clone(), name.clone(), cluster);
        cluster
            .create_secret(secret)
            .await
            .map_err(|e| Self::create_failed(ResourceKind::Secret, &namespace, &name, e))?;
        self.created(ResourceKind::Secret, &namespace, &name);
        Ok(())
    }

    /// Delete every owned object, newest first. Returns one message per
    /// object that could not be deleted.
    ///
    /// Runs to completion even when the attempt was cancelled.
    pub async fn teardown(&mut self) -> Vec<String> {
        let tracked = std::mem::take(&mut self.tracked);
        let config = RetryConfig::with_max_attempts(TEARDOWN_ATTEMPTS)
            .initial_delay(TEARDOWN_INITIAL_DELAY);

        let mut failures = Vec::new();
        for item in tracked.into_iter().rev() {
            let result =
                retry_with_backoff(&config, "delete_transient_resource", || item.delete()).await;
            if let Err(e) = result {
                self.sink.emit(MigrationEvent::TeardownFailed {
                    strategy: self.strategy.to_string(),
                    kind: item.kind,
                    namespace: item.namespace.clone(),
                    name: item.name.clone(),
                    message: e.to_string(),
                });
                failures.push(format!(
                    "{} {}/{}: {}",
                    item.kind, item.namespace, item.name, e
                ));
            }
        }
        failures
    }

    /// Tear everything down and combine the result with the attempt outcome
    ///
    /// A failed attempt keeps its error; teardown problems are appended to
    /// it. A successful attempt stays successful and carries teardown
    /// problems as warnings.
    pub async fn release(
        mut self,
        outcome: Result<(), StrategyError>,
    ) -> Result<AttemptReport, StrategyError> {
        let failures = self.teardown().await;

        match outcome {
            Ok(()) => Ok(AttemptReport {
                teardown_warnings: failures,
            }),
            Err(error) if failures.is_empty() => Err(error),
            Err(error) => Err(StrategyError::TeardownAfterFailure {
                error: Box::new(error),
                teardown: failures.join("; "),
            }),
        }
    }
}

impl Drop for TransientResources {
    fn drop(&mut self) {
        if self.tracked.is_empty() {
            return;
        }

        let tracked = std::mem::take(&mut self.tracked);
        let attempt = self.attempt.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    attempt = %attempt,
                    count = tracked.len(),
                    "Attempt dropped before teardown, deleting transient resources in background"
                );
                handle.spawn(async move {
                    for item in tracked.into_iter().rev() {
                        if let Err(e) = item.delete().await {
                            error!(
                                attempt = %attempt,
                                kind = %item.kind,
                                namespace = %item.namespace,
                                name = %item.name,
                                error = %e,
                                "Failed to delete transient resource, manual cleanup required"
                            );
                        }
                    }
                });
            }
            Err(_) => {
                for item in &tracked {
                    error!(
                        attempt = %attempt,
                        kind = %item.kind,
                        namespace = %item.namespace,
                        name = %item.name,
                        "No runtime to delete transient resource, manual cleanup required"
                    );
                }
            }
        }
    }
}
