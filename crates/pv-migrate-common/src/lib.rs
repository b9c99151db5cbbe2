//! Common types for pv-migrate: errors, Kubernetes helpers and retries

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Value of the `app.kubernetes.io/managed-by` label on every transient object
pub const LABEL_MANAGED_BY_PV_MIGRATE: &str = "pv-migrate";

/// Standard Kubernetes managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard Kubernetes component label key
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Label key carrying the id of the migration attempt that owns an object
pub const LABEL_ATTEMPT: &str = "pv-migrate.io/attempt";

/// Prefix of every transient object name
pub const RESOURCE_NAME_PREFIX: &str = "pv-migrate";
