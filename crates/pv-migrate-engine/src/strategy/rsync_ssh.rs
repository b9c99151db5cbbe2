//! rsync over ssh between a source-side client pod and a destination-side
//! sshd pod, shared by the in-cluster and cross-cluster strategies

use tracing::{debug, info};

use super::AttemptReport;
use crate::context::RunContext;
use crate::error::{Phase, StrategyError};
use crate::manifests::{
    self, ServiceExposure, AUTHORIZED_KEYS_FILE, PRIVATE_KEY_FILE, ROLE_AUTHORIZED_KEYS,
    ROLE_CLIENT_KEY, ROLE_RSYNC, ROLE_SSHD,
};
use crate::resources::TransientResources;
use crate::rsync::{RsyncCommand, SshTarget};
use crate::ssh::SshKeyPair;
use crate::task::MigrationTask;
use crate::transfer::{run_rsync, until_cancelled};

/// Run one rsync-over-ssh attempt, tearing everything down afterwards
pub(super) async fn migrate_over_ssh(
    strategy: &'static str,
    exposure: ServiceExposure,
    task: &MigrationTask,
    ctx: &RunContext,
) -> Result<AttemptReport, StrategyError> {
    let mut resources = TransientResources::new(strategy, ctx.sink().clone());
    let outcome = run(strategy, exposure, task, ctx, &mut resources).await;
    resources.release(outcome).await
}

async fn run(
    strategy: &'static str,
    exposure: ServiceExposure,
    task: &MigrationTask,
    ctx: &RunContext,
    resources: &mut TransientResources,
) -> Result<(), StrategyError> {
    let settings = ctx.settings();
    let attempt = resources.attempt().clone();
    let keys = SshKeyPair::generate();
    let source = task.source();
    let dest = task.dest();

    // Destination: sshd trusting the ephemeral public key
    let authorized_keys = manifests::key_secret(
        &attempt,
        dest.namespace(),
        ROLE_AUTHORIZED_KEYS,
        AUTHORIZED_KEYS_FILE,
        &keys.public_key_line(),
    );
    resources.create_secret(&dest.cluster, &authorized_keys).await?;

    let sshd_name = attempt.resource_name(ROLE_SSHD);
    let sshd = manifests::sshd_pod(
        &attempt,
        dest.namespace(),
        dest.claim(),
        dest.info.pinned_node(false),
        &settings.sshd_image,
        &attempt.resource_name(ROLE_AUTHORIZED_KEYS),
    );
    resources.create_pod(&dest.cluster, &sshd).await?;

    let service = manifests::sshd_service(&attempt, dest.namespace(), settings.ssh_port, exposure);
    resources.create_service(&dest.cluster, &service).await?;

    until_cancelled(
        ctx.cancel(),
        Phase::Ready,
        dest.cluster.wait_pod_ready(
            dest.namespace(),
            &sshd_name,
            settings.ready_timeout,
            ctx.cancel(),
        ),
    )
    .await?;

    let host = match exposure {
        ServiceExposure::ClusterIp => format!("{}.{}", sshd_name, dest.namespace()),
        ServiceExposure::LoadBalancer => {
            until_cancelled(
                ctx.cancel(),
                Phase::Expose,
                dest.cluster.wait_load_balancer(
                    dest.namespace(),
                    &sshd_name,
                    settings.load_balancer_timeout,
                    ctx.cancel(),
                ),
            )
            .await?
        }
    };
    info!(strategy = %strategy, host = %host, port = settings.ssh_port, "sshd is reachable");

    // Source: rsync client holding the private key
    let key_secret_name = attempt.resource_name(ROLE_CLIENT_KEY);
    let private_key = manifests::key_secret(
        &attempt,
        source.namespace(),
        ROLE_CLIENT_KEY,
        PRIVATE_KEY_FILE,
        &keys.private_key_pem(),
    );
    resources.create_secret(&source.cluster, &private_key).await?;

    let client_name = attempt.resource_name(ROLE_RSYNC);
    let client = manifests::idle_rsync_pod(
        &attempt,
        source.namespace(),
        source.claim(),
        source.info.pinned_node(true),
        &settings.rsync_image,
        Some(&key_secret_name),
    );
    resources.create_pod(&source.cluster, &client).await?;

    until_cancelled(
        ctx.cancel(),
        Phase::Ready,
        source.cluster.wait_pod_ready(
            source.namespace(),
            &client_name,
            settings.ready_timeout,
            ctx.cancel(),
        ),
    )
    .await?;

    let command = RsyncCommand::over_ssh(
        SshTarget {
            host,
            port: settings.ssh_port,
            key_path: manifests::private_key_path(),
        },
        task.delete_extraneous(),
    );
    debug!(strategy = %strategy, pod = %client_name, "Starting rsync over ssh");
    run_rsync(
        &source.cluster,
        source.namespace(),
        &client_name,
        &command,
        strategy,
        ctx,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterOps, MockClusterOps, ACCESS_MODE_RWO};
    use crate::events::{MemorySink, MigrationEvent};
    use crate::resources::ResourceKind;
    use crate::strategy::testing::{endpoint, task};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn accepting(ops: &mut MockClusterOps) {
        ops.expect_create_secret().returning(|_| Ok(()));
        ops.expect_create_pod().returning(|_| Ok(()));
        ops.expect_create_service().returning(|_| Ok(()));
        ops.expect_wait_pod_ready().returning(|_, _, _, _| Ok(()));
        ops.expect_delete_secret().returning(|_, _| Ok(()));
        ops.expect_delete_pod().returning(|_, _| Ok(()));
        ops.expect_delete_service().returning(|_, _| Ok(()));
    }

    #[tokio::test]
    async fn in_cluster_copy_targets_the_service_dns_name() {
        let mut ops = MockClusterOps::new();
        accepting(&mut ops);
        ops.expect_wait_load_balancer().never();
        ops.expect_exec().times(1).returning(|ns, _, _, command, _| {
            assert_eq!(ns, "apps");
            let dest = command.last().unwrap();
            assert!(dest.starts_with("root@pv-migrate-"));
            assert!(dest.ends_with("-sshd.apps-v2:/dest/"));
            Ok(0)
        });
        let c: Arc<dyn ClusterOps> = Arc::new(ops);

        let t = task(
            endpoint("prod", "apps", "old", c.clone(), &[ACCESS_MODE_RWO], None),
            endpoint("prod", "apps-v2", "new", c, &[ACCESS_MODE_RWO], None),
            false,
        );
        let sink = Arc::new(MemorySink::new());
        let ctx = RunContext::new(sink.clone());

        migrate_over_ssh("rsync-ssh-in-cluster", ServiceExposure::ClusterIp, &t, &ctx)
            .await
            .unwrap();

        let created: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::ResourceCreated { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![
                ResourceKind::Secret,
                ResourceKind::Pod,
                ResourceKind::Service,
                ResourceKind::Secret,
                ResourceKind::Pod
            ]
        );
    }

    #[tokio::test]
    async fn cross_cluster_copy_uses_the_load_balancer_address() {
        let mut dest = MockClusterOps::new();
        accepting(&mut dest);
        dest.expect_wait_load_balancer()
            .times(1)
            .returning(|_, _, _, _| Ok("203.0.113.7".to_string()));
        dest.expect_exec().never();

        let mut source = MockClusterOps::new();
        accepting(&mut source);
        source.expect_exec().times(1).returning(|_, _, _, command, _| {
            assert_eq!(command.last().unwrap(), "root@203.0.113.7:/dest/");
            assert!(command.iter().any(|a| a == "--delete"));
            Ok(0)
        });

        let t = task(
            endpoint("prod", "apps", "data", Arc::new(source), &[ACCESS_MODE_RWO], None),
            endpoint("dr", "apps", "data", Arc::new(dest), &[ACCESS_MODE_RWO], None),
            true,
        );
        let ctx = RunContext::new(Arc::new(MemorySink::new()));

        migrate_over_ssh("rsync-ssh-cross-cluster", ServiceExposure::LoadBalancer, &t, &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_load_balancer_still_tears_down() {
        let cancel = CancellationToken::new();

        let mut dest = MockClusterOps::new();
        dest.expect_create_secret().times(1).returning(|_| Ok(()));
        dest.expect_create_pod().times(1).returning(|_| Ok(()));
        dest.expect_create_service().times(1).returning(|_| Ok(()));
        dest.expect_wait_pod_ready().returning(|_, _, _, _| Ok(()));
        let c = cancel.clone();
        dest.expect_wait_load_balancer().returning(move |_, _, _, _| {
            c.cancel();
            Err(pv_migrate_common::Error::cancelled("waiting for load balancer"))
        });
        dest.expect_delete_service().times(1).returning(|_, _| Ok(()));
        dest.expect_delete_pod().times(1).returning(|_, _| Ok(()));
        dest.expect_delete_secret().times(1).returning(|_, _| Ok(()));

        let mut source = MockClusterOps::new();
        source.expect_create_secret().never();
        source.expect_create_pod().never();

        let t = task(
            endpoint("prod", "apps", "data", Arc::new(source), &[ACCESS_MODE_RWO], None),
            endpoint("dr", "apps", "data", Arc::new(dest), &[ACCESS_MODE_RWO], None),
            false,
        );
        let ctx = RunContext::new(Arc::new(MemorySink::new())).with_cancel(cancel);

        let exposure = ServiceExposure::LoadBalancer;
        let err = migrate_over_ssh("rsync-ssh-cross-cluster", exposure, &t, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Cancelled { phase: Phase::Expose }));
    }
}
