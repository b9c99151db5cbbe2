//! pv-migrate command-line interface
//!
//! Parses the two claim endpoints, builds the engine with its default
//! strategy chain and runs one migration against live clusters. Ctrl-C and
//! the optional overall timeout both cancel the run; transient resources
//! are torn down before the process exits.

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pv_migrate_engine::{
    ClusterRef, Engine, KubeConnector, MigrationOutcome, MigrationRequest, MigrationSettings,
    PvcReference, RequestOptions, RunContext, TracingSink, DEFAULT_LOAD_BALANCER_TIMEOUT,
    DEFAULT_READY_TIMEOUT, DEFAULT_RSYNC_IMAGE, DEFAULT_SSHD_IMAGE, DEFAULT_TRANSFER_ATTEMPTS,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

pub use error::{Error, Result};

/// Migrate data between Kubernetes persistent volume claims
#[derive(Parser, Debug)]
#[command(name = "pv-migrate", version, about, long_about = None)]
pub struct Cli {
    /// Path to the kubeconfig file (default discovery rules when unset)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Source persistent volume claim
    #[arg(long)]
    pub source: String,

    /// Namespace of the source claim
    #[arg(long)]
    pub source_namespace: String,

    /// Kubeconfig context of the source claim
    #[arg(long)]
    pub source_context: Option<String>,

    /// Destination persistent volume claim
    #[arg(long)]
    pub dest: String,

    /// Namespace of the destination claim
    #[arg(long)]
    pub dest_namespace: String,

    /// Kubeconfig context of the destination claim
    #[arg(long)]
    pub dest_context: Option<String>,

    /// Delete files on the destination that do not exist on the source
    #[arg(long, short = 'd')]
    pub dest_delete_extraneous_files: bool,

    /// Comma-separated strategies to try, in order
    #[arg(long, value_delimiter = ',')]
    pub strategies: Option<Vec<String>>,

    /// Image used for rsync pods
    #[arg(long, env = "PV_MIGRATE_RSYNC_IMAGE", default_value = DEFAULT_RSYNC_IMAGE)]
    pub rsync_image: String,

    /// Image used for the destination sshd pod
    #[arg(long, env = "PV_MIGRATE_SSHD_IMAGE", default_value = DEFAULT_SSHD_IMAGE)]
    pub sshd_image: String,

    /// Seconds to wait for each transient pod to become ready
    #[arg(
        long,
        default_value_t = DEFAULT_READY_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub ready_timeout_secs: u64,

    /// Seconds to wait for a load balancer address
    #[arg(
        long,
        default_value_t = DEFAULT_LOAD_BALANCER_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub load_balancer_timeout_secs: u64,

    /// rsync runs per attempt when the connection drops
    #[arg(
        long,
        default_value_t = DEFAULT_TRANSFER_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub transfer_attempts: u32,

    /// Cancel the whole migration after this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: Option<u64>,
}

impl Cli {
    /// Build the migration request from the endpoint flags
    pub fn request(&self) -> Result<MigrationRequest> {
        if let Some(path) = &self.kubeconfig {
            if !path.exists() {
                return Err(Error::validation(format!(
                    "kubeconfig {} does not exist",
                    path.display()
                )));
            }
        }

        let source = PvcReference::new(
            ClusterRef::new(self.kubeconfig.clone(), self.source_context.clone()),
            &self.source_namespace,
            &self.source,
        )?;
        let dest = PvcReference::new(
            ClusterRef::new(self.kubeconfig.clone(), self.dest_context.clone()),
            &self.dest_namespace,
            &self.dest,
        )?;

        let request = MigrationRequest::new(
            source,
            dest,
            RequestOptions::new(self.dest_delete_extraneous_files),
        );
        let request = match &self.strategies {
            Some(names) => request.with_strategies(names.iter().map(|n| n.trim().to_string())),
            None => request,
        };
        request.validate()?;
        Ok(request)
    }

    /// Strategy settings from the tuning flags
    pub fn settings(&self) -> MigrationSettings {
        MigrationSettings {
            rsync_image: self.rsync_image.clone(),
            sshd_image: self.sshd_image.clone(),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            load_balancer_timeout: Duration::from_secs(self.load_balancer_timeout_secs),
            transfer_attempts: self.transfer_attempts,
            ..Default::default()
        }
    }

    /// Run one migration
    pub async fn run(self) -> Result<()> {
        let request = self.request()?;
        let sink = Arc::new(TracingSink::for_request(&request));
        let span = sink.span().clone();
        let settings = self.settings();
        let timeout = self.timeout_secs.map(Duration::from_secs);

        async move {
            if request.options().delete_extraneous() {
                warn!("Delete extraneous files from dest is enabled");
            }

            let engine = Engine::with_default_strategies();
            let names = engine.strategy_names();
            info!(
                strategies = ?names,
                "Engine initialized with {} total strategies",
                names.len()
            );

            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_interrupt(cancel.clone(), timeout));

            let ctx = RunContext::new(sink)
                .with_cancel(cancel)
                .with_settings(settings);
            let result = engine.run(request, &KubeConnector::new(), &ctx).await;

            watcher.abort();
            let interrupted = watcher.await.ok();

            match result {
                Ok(outcome) => {
                    report(&outcome);
                    Ok(())
                }
                Err(err) => {
                    error!(error = %err, "Migration failed");
                    match interrupted {
                        Some(reason) if err.is_cancelled() => Err(Error::interrupted(reason)),
                        _ => Err(err.into()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Cancel `cancel` on Ctrl-C or once `timeout` elapses; returns the reason
async fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) -> String {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        _ = ctrl_c => "received interrupt".to_string(),
        _ = deadline => format!(
            "timed out after {}s",
            timeout.map(|t| t.as_secs()).unwrap_or_default()
        ),
    };

    warn!(%reason, "Cancelling migration");
    cancel.cancel();
    reason
}

fn report(outcome: &MigrationOutcome) {
    for failure in &outcome.failures {
        warn!(
            strategy = %failure.strategy,
            error = %failure.error,
            "Strategy failed before fallback"
        );
    }
    for warning in &outcome.teardown_warnings {
        warn!(%warning, "Transient resource was not cleaned up");
    }
    info!(
        strategy = %outcome.strategy,
        skipped = ?outcome.skipped,
        "Migration succeeded"
    );
}
