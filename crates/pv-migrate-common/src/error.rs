//! Error types for cluster-side operations
//!
//! Errors carry the operation context they came from (e.g. "create_pod",
//! "wait_pod_ready") so strategy failures read well without a backtrace.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Error type for cluster access and resource operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kubernetes kind
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Object name
        name: String,
    },

    /// A pod stopped before it ever became ready
    #[error("pod {namespace}/{name} terminated: {reason}")]
    PodTerminated {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        name: String,
        /// Reason reported in the pod status
        reason: String,
    },

    /// No node can run a pod with its current volumes and constraints
    #[error("pod {namespace}/{name} cannot be scheduled: {reason}")]
    PodUnschedulable {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        name: String,
        /// Scheduler message
        reason: String,
    },

    /// Invalid input or cluster state
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// A bounded wait ran out of time
    #[error("timed out after {}s: {message}", .timeout.as_secs())]
    Timeout {
        /// What was being waited for
        message: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The operation was cancelled by the caller
    #[error("operation cancelled: {context}")]
    Cancelled {
        /// What was running when cancellation was observed
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "exec")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a namespaced object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            message: msg.into(),
            timeout,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Client-side (4xx) Kubernetes errors, missing objects and validation
    /// errors need a fix before retrying. Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NotFound { .. } => false,
            Error::PodTerminated { .. } => false,
            Error::PodUnschedulable { .. } => false,
            Error::Validation { .. } => false,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error is a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story: errors read well in a migration failure report
    // ==========================================================================

    #[test]
    fn missing_claim_names_kind_namespace_and_name() {
        let err = Error::not_found("PersistentVolumeClaim", "apps", "data");
        assert_eq!(
            err.to_string(),
            "PersistentVolumeClaim apps/data not found"
        );
    }

    #[test]
    fn timeout_reports_the_bound_in_seconds() {
        let err = Error::timeout("pod pv-migrate-x-sshd not ready", Duration::from_secs(120));
        assert_eq!(
            err.to_string(),
            "timed out after 120s: pod pv-migrate-x-sshd not ready"
        );
    }

    #[test]
    fn internal_error_carries_context() {
        let err = Error::internal_with_context("exec", "stream closed");
        assert_eq!(err.to_string(), "internal error [exec]: stream closed");

        let err = Error::internal("boom");
        assert_eq!(
            err.to_string(),
            format!("internal error [{}]: boom", UNKNOWN_CONTEXT)
        );
    }

    // ==========================================================================
    // Story: retry decisions
    // ==========================================================================

    #[test]
    fn timeouts_and_internal_errors_are_retryable() {
        assert!(Error::timeout("x", Duration::from_secs(1)).is_retryable());
        assert!(Error::internal("x").is_retryable());
    }

    #[test]
    fn user_errors_and_cancellation_are_not_retryable() {
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::not_found("Pod", "ns", "p").is_retryable());
        assert!(!Error::PodTerminated {
            namespace: "ns".to_string(),
            name: "p".to_string(),
            reason: "Evicted".to_string(),
        }
        .is_retryable());
        assert!(!Error::PodUnschedulable {
            namespace: "ns".to_string(),
            name: "p".to_string(),
            reason: "volume node affinity conflict".to_string(),
        }
        .is_retryable());
        assert!(!Error::cancelled("wait").is_retryable());
        assert!(Error::cancelled("wait").is_cancelled());
    }

    #[test]
    fn kube_client_errors_are_not_retryable_but_server_errors_are() {
        let client_err = Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        }));
        assert!(!client_err.is_retryable());

        let server_err = Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "etcd unavailable".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        }));
        assert!(server_err.is_retryable());
    }
}
