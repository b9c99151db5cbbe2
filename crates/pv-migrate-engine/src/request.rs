//! Migration request value types
//!
//! A request names two claims and how to reach their clusters. Nothing here
//! talks to a cluster; existence is checked when the engine resolves the
//! request into a [`MigrationTask`](crate::MigrationTask).

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::MigrationError;

/// How to reach a cluster: kubeconfig path and context, both optional
///
/// Two endpoints are in the same cluster exactly when their `ClusterRef`s
/// are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl ClusterRef {
    /// Create a cluster reference; empty values mean "use the default"
    pub fn new(kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.filter(|p| !p.as_os_str().is_empty()),
            context: context.filter(|c| !c.is_empty()),
        }
    }

    /// Kubeconfig path, `None` for the default discovery rules
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    /// Context name, `None` for the kubeconfig's current context
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context.as_deref().unwrap_or("default"))
    }
}

/// One endpoint of a migration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PvcReference {
    cluster: ClusterRef,
    namespace: String,
    claim: String,
}

impl PvcReference {
    /// Create a reference, rejecting an empty namespace or claim name
    pub fn new(
        cluster: ClusterRef,
        namespace: impl Into<String>,
        claim: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let namespace = namespace.into();
        let claim = claim.into();

        if namespace.trim().is_empty() {
            return Err(MigrationError::configuration("namespace must not be empty"));
        }
        if claim.trim().is_empty() {
            return Err(MigrationError::configuration("claim name must not be empty"));
        }

        Ok(Self {
            cluster,
            namespace,
            claim,
        })
    }

    /// Cluster access parameters
    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    /// Namespace of the claim
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Claim name
    pub fn claim(&self) -> &str {
        &self.claim
    }
}

impl fmt::Display for PvcReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.claim, self.cluster)
    }
}

/// Migration-wide behavior toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    delete_extraneous: bool,
}

impl RequestOptions {
    /// Create options
    pub fn new(delete_extraneous: bool) -> Self {
        Self { delete_extraneous }
    }

    /// Remove files from the destination that do not exist in the source
    pub fn delete_extraneous(&self) -> bool {
        self.delete_extraneous
    }
}

/// A request to copy the contents of one claim into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    source: PvcReference,
    dest: PvcReference,
    options: RequestOptions,
    strategies: Option<Vec<String>>,
}

impl MigrationRequest {
    /// Create a request that lets the engine pick from all its strategies
    pub fn new(source: PvcReference, dest: PvcReference, options: RequestOptions) -> Self {
        Self {
            source,
            dest,
            options,
            strategies: None,
        }
    }

    /// Restrict and reorder the strategies the engine may attempt
    pub fn with_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = Some(strategies.into_iter().map(Into::into).collect());
        self
    }

    /// Source endpoint
    pub fn source(&self) -> &PvcReference {
        &self.source
    }

    /// Destination endpoint
    pub fn dest(&self) -> &PvcReference {
        &self.dest
    }

    /// Request options
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Explicit strategy order, if any
    pub fn strategies(&self) -> Option<&[String]> {
        self.strategies.as_deref()
    }

    /// Check the strategy override: non-empty, no blank or repeated names
    pub fn validate(&self) -> Result<(), MigrationError> {
        let Some(strategies) = &self.strategies else {
            return Ok(());
        };

        if strategies.is_empty() {
            return Err(MigrationError::configuration(
                "strategy override must name at least one strategy",
            ));
        }

        let mut seen = HashSet::new();
        for name in strategies {
            if name.trim().is_empty() {
                return Err(MigrationError::configuration(
                    "strategy override contains an empty name",
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(MigrationError::configuration(format!(
                    "strategy {} is listed more than once",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Flat key/value view for log correlation
    pub fn log_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("source_cluster", self.source.cluster.to_string()),
            ("source_namespace", self.source.namespace.clone()),
            ("source_claim", self.source.claim.clone()),
            ("dest_cluster", self.dest.cluster.to_string()),
            ("dest_namespace", self.dest.namespace.clone()),
            ("dest_claim", self.dest.claim.clone()),
        ]
    }
}
