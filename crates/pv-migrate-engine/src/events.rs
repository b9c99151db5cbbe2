//! Structured migration events and the sinks that receive them
//!
//! The engine and strategies never format or route logs themselves. They
//! emit [`MigrationEvent`]s to whatever [`EventSink`] the caller injected.

use std::sync::Mutex;

use tracing::{debug, error, info, info_span, warn, Span};

use crate::error::FailureKind;
use crate::request::MigrationRequest;
use crate::resources::ResourceKind;

/// Something that happened during a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// A strategy is about to run
    StrategyAttempted {
        /// Strategy name
        strategy: String,
    },
    /// A strategy does not apply to the request's topology
    StrategySkipped {
        /// Strategy name
        strategy: String,
    },
    /// A strategy finished the copy
    StrategySucceeded {
        /// Strategy name
        strategy: String,
    },
    /// A strategy failed; the engine moves on to the next one
    StrategyFailed {
        /// Strategy name
        strategy: String,
        /// Failure classification
        kind: FailureKind,
        /// Error message
        message: String,
    },
    /// A transient object was created
    ResourceCreated {
        /// Strategy that owns the object
        strategy: String,
        /// Object kind
        kind: ResourceKind,
        /// Namespace
        namespace: String,
        /// Object name
        name: String,
    },
    /// A transient object could not be deleted and needs manual cleanup
    TeardownFailed {
        /// Strategy that owned the object
        strategy: String,
        /// Object kind
        kind: ResourceKind,
        /// Namespace
        namespace: String,
        /// Object name
        name: String,
        /// Error message
        message: String,
    },
    /// One line of output from the running copy
    TransferOutput {
        /// Strategy running the copy
        strategy: String,
        /// Output line without its terminator
        line: String,
    },
}

/// Receiver of migration events
pub trait EventSink: Send + Sync {
    /// Record one event
    fn emit(&self, event: MigrationEvent);
}

/// Sink that forwards events to `tracing`, inside a span carrying the
/// request's correlation fields
pub struct TracingSink {
    span: Span,
}

impl TracingSink {
    /// Sink for one request
    pub fn for_request(request: &MigrationRequest) -> Self {
        let source = request.source();
        let dest = request.dest();
        let span = info_span!(
            "migration",
            source_cluster = %source.cluster(),
            source_namespace = %source.namespace(),
            source_claim = %source.claim(),
            dest_cluster = %dest.cluster(),
            dest_namespace = %dest.namespace(),
            dest_claim = %dest.claim(),
        );
        Self { span }
    }

    /// Span every event is logged in
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: MigrationEvent) {
        let _entered = self.span.enter();
        match event {
            MigrationEvent::StrategyAttempted { strategy } => {
                info!(strategy = %strategy, "Attempting strategy");
            }
            MigrationEvent::StrategySkipped { strategy } => {
                info!(strategy = %strategy, "Strategy cannot handle this migration, skipping");
            }
            MigrationEvent::StrategySucceeded { strategy } => {
                info!(strategy = %strategy, "Migration succeeded");
            }
            MigrationEvent::StrategyFailed {
                strategy,
                kind,
                message,
            } => {
                warn!(strategy = %strategy, kind = %kind, error = %message, "Strategy failed");
            }
            MigrationEvent::ResourceCreated {
                strategy,
                kind,
                namespace,
                name,
            } => {
                debug!(
                    strategy = %strategy,
                    kind = %kind,
                    namespace = %namespace,
                    name = %name,
                    "Created transient resource"
                );
            }
            MigrationEvent::TeardownFailed {
                strategy,
                kind,
                namespace,
                name,
                message,
            } => {
                error!(
                    strategy = %strategy,
                    kind = %kind,
                    namespace = %namespace,
                    name = %name,
                    error = %message,
                    "Failed to delete transient resource, manual cleanup required"
                );
            }
            MigrationEvent::TransferOutput { strategy, line } => {
                info!(strategy = %strategy, "{}", line);
            }
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of strategies that were attempted, in order
    pub fn attempted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::StrategyAttempted { strategy } => Some(strategy),
                _ => None,
            })
            .collect()
    }

    /// Names of strategies that were skipped, in order
    pub fn skipped(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::StrategySkipped { strategy } => Some(strategy),
                _ => None,
            })
            .collect()
    }

    /// Transfer output lines, in order
    pub fn output(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::TransferOutput { line, .. } => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: MigrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
