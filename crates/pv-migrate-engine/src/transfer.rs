//! Running rsync inside a transient pod

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use pv_migrate_common::retry::{retry_cancellable, RetryConfig, RetryError};
use pv_migrate_common::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::ClusterOps;
use crate::context::RunContext;
use crate::error::{Phase, StrategyError};
use crate::events::MigrationEvent;
use crate::manifests::RSYNC_CONTAINER;
use crate::rsync::{describe_exit_code, is_retryable_exit_code, RsyncCommand};

/// Output lines buffered between exec and the event sink
const OUTPUT_BUFFER: usize = 256;

/// Await a cluster operation unless `cancel` fires first
pub async fn until_cancelled<T, F>(
    cancel: &CancellationToken,
    phase: Phase,
    operation: F,
) -> Result<T, StrategyError>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StrategyError::Cancelled { phase }),
        result = operation => result.map_err(|e| StrategyError::from_cluster(phase, e)),
    }
}

enum ExecFailure {
    Cluster(Error),
    Exit(i32),
    Cancelled,
}

impl ExecFailure {
    fn is_retryable(&self) -> bool {
        match self {
            ExecFailure::Cluster(e) => e.is_retryable(),
            ExecFailure::Exit(code) => is_retryable_exit_code(*code),
            ExecFailure::Cancelled => false,
        }
    }
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecFailure::Cluster(e) => write!(f, "exec failed: {}", e),
            ExecFailure::Exit(code) => write!(
                f,
                "rsync exited with code {} ({})",
                code,
                describe_exit_code(*code)
            ),
            ExecFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Run `command` in the rsync container of `pod` until it exits 0
///
/// Output lines are forwarded to the sink while the command runs.
/// Connection failures are retried with backoff up to
/// `settings.transfer_attempts` runs.
pub async fn run_rsync(
    cluster: &Arc<dyn ClusterOps>,
    namespace: &str,
    pod: &str,
    command: &RsyncCommand,
    strategy: &'static str,
    ctx: &RunContext,
) -> Result<(), StrategyError> {
    let args = command.to_args();
    let settings = ctx.settings();
    let config = RetryConfig::with_max_attempts(settings.transfer_attempts.max(1))
        .initial_delay(settings.transfer_retry_delay);

    let result = retry_cancellable(
        &config,
        "rsync",
        ctx.cancel(),
        ExecFailure::is_retryable,
        |attempt| {
            let args = args.clone();
            async move {
                debug!(strategy = %strategy, pod = %pod, attempt, "Running rsync");
                exec_once(cluster, namespace, pod, args, strategy, ctx).await
            }
        },
    )
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(RetryError::Cancelled) | Err(RetryError::Failed(ExecFailure::Cancelled)) => {
            Err(StrategyError::Cancelled {
                phase: Phase::Transfer,
            })
        }
        Err(RetryError::Failed(e)) => Err(StrategyError::transfer(Phase::Transfer, e.to_string())),
    }
}

async fn exec_once(
    cluster: &Arc<dyn ClusterOps>,
    namespace: &str,
    pod: &str,
    args: Vec<String>,
    strategy: &'static str,
    ctx: &RunContext,
) -> Result<(), ExecFailure> {
    let (tx, mut rx) = mpsc::channel(OUTPUT_BUFFER);

    // The sender lives inside the exec future, so forwarding ends when
    // exec finishes or is dropped on cancellation.
    let exec = async move {
        tokio::select! {
            biased;
            _ = ctx.cancel().cancelled() => Err(ExecFailure::Cancelled),
            result = cluster.exec(namespace, pod, RSYNC_CONTAINER, args, tx) => match result {
                Ok(0) => Ok(()),
                Ok(code) => Err(ExecFailure::Exit(code)),
                Err(e) if e.is_cancelled() => Err(ExecFailure::Cancelled),
                Err(e) => Err(ExecFailure::Cluster(e)),
            },
        }
    };

    let forward = async {
        while let Some(line) = rx.recv().await {
            ctx.emit(MigrationEvent::TransferOutput {
                strategy: strategy.to_string(),
                line,
            });
        }
    };

    let (result, ()) = tokio::join!(exec, forward);
    result
}

/// Splits a byte stream into lines on `\n` or `\r`
///
/// rsync's progress output rewrites the current line with `\r`, so both
/// count as terminators. Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and return the lines it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    /// Flush an unterminated last line
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
