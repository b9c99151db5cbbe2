//! Error types for migration runs

use std::fmt;

use thiserror::Error;

/// Which endpoint of a migration an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The claim data is copied from
    Source,
    /// The claim data is copied to
    Dest,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Dest => write!(f, "dest"),
        }
    }
}

/// Step of a strategy attempt, used to say where an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Creating pods, services and secrets
    Provision,
    /// Waiting for a pod to report ready
    Ready,
    /// Waiting for the destination endpoint to become reachable
    Expose,
    /// Running the copy
    Transfer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Provision => write!(f, "provision"),
            Phase::Ready => write!(f, "ready"),
            Phase::Expose => write!(f, "expose"),
            Phase::Transfer => write!(f, "transfer"),
        }
    }
}

/// Coarse classification of a strategy failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provisioning, connectivity or copy failed
    Transfer,
    /// The caller cancelled the run
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transfer => write!(f, "transfer"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by a single strategy attempt
#[derive(Debug, Error)]
pub enum StrategyError {
    /// A step of the attempt failed
    #[error("{phase} failed: {message}")]
    Transfer {
        /// Step that failed
        phase: Phase,
        /// Error message
        message: String,
    },

    /// The caller's cancellation signal was observed
    #[error("cancelled during {phase}")]
    Cancelled {
        /// Step that was running
        phase: Phase,
    },

    /// The attempt failed and cleaning up after it failed as well
    #[error("{error}; teardown also failed: {teardown}")]
    TeardownAfterFailure {
        /// The failure that ended the attempt
        error: Box<StrategyError>,
        /// What could not be deleted
        teardown: String,
    },
}

impl StrategyError {
    /// Create a transfer error for the given phase
    pub fn transfer(phase: Phase, message: impl Into<String>) -> Self {
        Self::Transfer {
            phase,
            message: message.into(),
        }
    }

    /// Convert a cluster-layer error, keeping cancellation distinguishable
    pub fn from_cluster(phase: Phase, err: pv_migrate_common::Error) -> Self {
        if err.is_cancelled() {
            Self::Cancelled { phase }
        } else {
            Self::transfer(phase, err.to_string())
        }
    }

    /// Failure kind of the error that ended the attempt
    pub fn kind(&self) -> FailureKind {
        match self {
            StrategyError::Transfer { .. } => FailureKind::Transfer,
            StrategyError::Cancelled { .. } => FailureKind::Cancelled,
            StrategyError::TeardownAfterFailure { error, .. } => error.kind(),
        }
    }

    /// Whether the attempt ended because of cancellation
    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }
}

/// One failed strategy in an aggregate error
#[derive(Debug)]
pub struct StrategyFailure {
    /// Strategy name
    pub strategy: String,
    /// Why it failed
    pub error: StrategyError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.strategy, self.error.kind(), self.error)
    }
}

fn format_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_cancelled(strategy: &Option<String>) -> String {
    match strategy {
        Some(name) => format!(" while running {}", name),
        None => String::new(),
    }
}

/// Errors from a migration run
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Invalid engine or request configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An endpoint could not be resolved against its cluster
    #[error("failed to resolve {side} claim {claim}: {message}")]
    Resolution {
        /// Endpoint that failed
        side: Side,
        /// `namespace/claim`
        claim: String,
        /// Error message
        message: String,
    },

    /// No candidate strategy applies to the request's topology
    #[error("no applicable strategy (skipped: {})", .skipped.join(", "))]
    NoApplicableStrategy {
        /// Names of the strategies that were skipped
        skipped: Vec<String>,
    },

    /// Every applicable strategy was attempted and failed
    #[error("all strategies failed: {}", format_failures(.failures))]
    AllStrategiesFailed {
        /// Failures in attempt order
        failures: Vec<StrategyFailure>,
    },

    /// The caller cancelled the run
    #[error("migration cancelled{}", format_cancelled(.strategy))]
    Cancelled {
        /// Strategy that was running when cancellation was observed
        strategy: Option<String>,
    },
}

impl MigrationError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error is a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled { .. })
    }
}
