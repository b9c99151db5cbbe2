//! The strategy chain
//!
//! The engine owns an ordered list of strategies and, for each request,
//! walks it until one strategy succeeds. Strategies that cannot handle the
//! topology are skipped; strategies that fail are recorded and the next one
//! is tried. Nothing runs in parallel.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::cluster::ClusterConnector;
use crate::context::RunContext;
use crate::error::{MigrationError, StrategyFailure};
use crate::events::MigrationEvent;
use crate::request::MigrationRequest;
use crate::strategy::{default_strategies, Strategy};
use crate::task::MigrationTask;

/// Result of a successful run
#[derive(Debug)]
pub struct MigrationOutcome {
    /// Strategy that copied the data
    pub strategy: String,
    /// Strategies skipped because they did not apply
    pub skipped: Vec<String>,
    /// Strategies that failed before the successful one
    pub failures: Vec<StrategyFailure>,
    /// Transient objects the successful strategy could not delete
    pub teardown_warnings: Vec<String>,
}

/// Ordered, immutable set of strategies
pub struct Engine {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Engine {
    /// Create an engine; the list must be non-empty with unique names
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Result<Self, MigrationError> {
        if strategies.is_empty() {
            return Err(MigrationError::configuration(
                "engine needs at least one strategy",
            ));
        }

        let mut seen = HashSet::new();
        for strategy in &strategies {
            if !seen.insert(strategy.name()) {
                return Err(MigrationError::configuration(format!(
                    "strategy {} is configured more than once",
                    strategy.name()
                )));
            }
        }

        Ok(Self { strategies })
    }

    /// Engine with all built-in strategies in their default order
    pub fn with_default_strategies() -> Self {
        Self {
            strategies: default_strategies(),
        }
    }

    /// Names of the configured strategies, in order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Strategies to consider for `request`, honoring its override
    fn candidates(
        &self,
        request: &MigrationRequest,
    ) -> Result<Vec<Arc<dyn Strategy>>, MigrationError> {
        request.validate()?;

        let Some(names) = request.strategies() else {
            return Ok(self.strategies.clone());
        };

        names
            .iter()
            .map(|name| {
                self.strategies
                    .iter()
                    .find(|s| s.name() == name)
                    .cloned()
                    .ok_or_else(|| {
                        MigrationError::configuration(format!(
                            "unknown strategy {} (available: {})",
                            name,
                            self.strategy_names().join(", ")
                        ))
                    })
            })
            .collect()
    }

    /// Resolve `request` against its clusters and run the strategy chain
    pub async fn run(
        &self,
        request: MigrationRequest,
        connector: &dyn ClusterConnector,
        ctx: &RunContext,
    ) -> Result<MigrationOutcome, MigrationError> {
        let candidates = self.candidates(&request)?;
        let task = MigrationTask::resolve(request, connector, ctx).await?;
        self.attempt_in_order(&candidates, &task, ctx).await
    }

    /// Run the strategy chain for an already resolved task
    pub async fn run_task(
        &self,
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<MigrationOutcome, MigrationError> {
        let candidates = self.candidates(task.request())?;
        self.attempt_in_order(&candidates, task, ctx).await
    }

    async fn attempt_in_order(
        &self,
        candidates: &[Arc<dyn Strategy>],
        task: &MigrationTask,
        ctx: &RunContext,
    ) -> Result<MigrationOutcome, MigrationError> {
        let mut skipped = Vec::new();
        let mut failures = Vec::new();

        for strategy in candidates {
            let name = strategy.name();
            if ctx.cancel().is_cancelled() {
                return Err(MigrationError::Cancelled { strategy: None });
            }

            if !strategy.can_attempt(task) {
                ctx.emit(MigrationEvent::StrategySkipped {
                    strategy: name.to_string(),
                });
                skipped.push(name.to_string());
                continue;
            }

            ctx.emit(MigrationEvent::StrategyAttempted {
                strategy: name.to_string(),
            });

            match strategy.migrate(task, ctx).await {
                Ok(report) => {
                    ctx.emit(MigrationEvent::StrategySucceeded {
                        strategy: name.to_string(),
                    });
                    return Ok(MigrationOutcome {
                        strategy: name.to_string(),
                        skipped,
                        failures,
                        teardown_warnings: report.teardown_warnings,
                    });
                }
                Err(error) => {
                    ctx.emit(MigrationEvent::StrategyFailed {
                        strategy: name.to_string(),
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                    if error.is_cancelled() {
                        return Err(MigrationError::Cancelled {
                            strategy: Some(name.to_string()),
                        });
                    }
                    failures.push(StrategyFailure {
                        strategy: name.to_string(),
                        error,
                    });
                }
            }
        }

        debug!(
            skipped = skipped.len(),
            failed = failures.len(),
            "Strategy chain exhausted"
        );
        if failures.is_empty() {
            Err(MigrationError::NoApplicableStrategy { skipped })
        } else {
            Err(MigrationError::AllStrategiesFailed { failures })
        }
    }
}
