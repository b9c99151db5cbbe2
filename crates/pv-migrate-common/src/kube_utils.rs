//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction from kubeconfig + context, bounded polling that
//! observes cancellation, and small helpers for reading object state.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Error;

/// The "Ready" condition type for pods
pub const CONDITION_READY: &str = "Ready";
/// The "PodScheduled" condition type for pods
pub const CONDITION_POD_SCHEDULED: &str = "PodScheduled";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
/// The "False" status value for conditions
pub const STATUS_FALSE: &str = "False";
/// Reason the scheduler reports when no node fits a pod
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";

/// Default polling interval for wait operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Observed readiness of a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodReadiness {
    /// All containers report ready
    Ready,
    /// Still starting (pending, pulling images, not ready yet)
    Starting,
    /// The pod terminated and will never become ready
    Terminated(String),
    /// The scheduler found no node for the pod, e.g. because its volumes
    /// are bound to different zones
    Unschedulable(String),
}

/// Classify a pod's readiness from its status
pub fn pod_readiness(pod: &Pod) -> PodReadiness {
    let Some(status) = pod.status.as_ref() else {
        return PodReadiness::Starting;
    };

    match status.phase.as_deref() {
        Some("Failed") | Some("Succeeded") => {
            let reason = status
                .reason
                .clone()
                .or_else(|| status.message.clone())
                .unwrap_or_else(|| status.phase.clone().unwrap_or_default());
            return PodReadiness::Terminated(reason);
        }
        _ => {}
    }

    let unschedulable = status.conditions.iter().flatten().find(|c| {
        c.type_ == CONDITION_POD_SCHEDULED
            && c.status == STATUS_FALSE
            && c.reason.as_deref() == Some(REASON_UNSCHEDULABLE)
    });
    if let Some(condition) = unschedulable {
        let reason = condition
            .message
            .clone()
            .unwrap_or_else(|| REASON_UNSCHEDULABLE.to_string());
        return PodReadiness::Unschedulable(reason);
    }

    if has_condition(status.conditions.as_deref(), CONDITION_READY) {
        PodReadiness::Ready
    } else {
        PodReadiness::Starting
    }
}

/// Poll until a condition is met, the timeout is reached, or `cancel` fires.
///
/// `check_fn` returns `Ok(true)` when the condition is met and `Ok(false)` to
/// keep polling. Retryable errors are logged and polling continues;
/// non-retryable errors end the wait immediately.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let timeout_msg = timeout_msg.into();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) if e.is_retryable() => {
                trace!("Polling check returned error (retrying): {}", e);
            }
            Err(e) => return Err(e),
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::timeout(timeout_msg, timeout));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(timeout_msg)),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Create a kube client from an optional kubeconfig path and context
///
/// Without a path the usual discovery rules apply (`KUBECONFIG`, then
/// `~/.kube/config`, then in-cluster). Without a context the kubeconfig's
/// current context is used.
pub async fn create_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<Client, Error> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let mut config = match (kubeconfig, context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        (None, Some(_)) => Config::from_kubeconfig(&options).await.map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?,
        (None, None) => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check if an error indicates a "not found" condition.
pub fn is_not_found_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => api_err.code == 404,
        _ => false,
    }
}
