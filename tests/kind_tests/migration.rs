//! Migration stories against a live cluster
//!
//! Each test seeds a source claim through a helper pod, runs the engine with
//! the real kube backend and reads the destination back through another
//! helper pod.

use std::sync::Arc;

use pv_migrate_engine::{
    ClusterRef, Engine, KubeConnector, MemorySink, MigrationRequest, PvcReference,
    RequestOptions, RunContext,
};

use super::helpers::{ensure_test_cluster, TestNamespace};

fn claim(namespace: &TestNamespace, name: &str) -> PvcReference {
    PvcReference::new(ClusterRef::default(), namespace.name.clone(), name)
        .expect("valid claim reference")
}

async fn migrate(request: MigrationRequest) -> String {
    let ctx = RunContext::new(Arc::new(MemorySink::new()));
    let outcome = Engine::with_default_strategies()
        .run(request, &KubeConnector::new(), &ctx)
        .await
        .expect("migration failed");
    assert!(
        outcome.teardown_warnings.is_empty(),
        "teardown warnings: {:?}",
        outcome.teardown_warnings
    );
    assert!(
        outcome.failures.is_empty(),
        "failed attempts: {:?}",
        outcome.failures
    );
    outcome.strategy
}

// =============================================================================
// Same-namespace Stories
// =============================================================================

/// Story: Operator moves an app onto a bigger claim in the same namespace
///
/// Both claims live side by side, so a single pod can mount them and copy
/// locally without any network hop.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_copies_a_claim_within_its_namespace() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "pv-migrate-same").await;
    ns.create_claim("old").await;
    ns.create_claim("new").await;
    ns.run_with_claim("old", "mkdir -p /data/app && echo v1 > /data/app/config")
        .await;

    let strategy = migrate(MigrationRequest::new(
        claim(&ns, "old"),
        claim(&ns, "new"),
        RequestOptions::default(),
    ))
    .await;

    assert_eq!(strategy, "mount-both");
    let copied = ns.run_with_claim("new", "cat /data/app/config").await;
    assert_eq!(copied.trim(), "v1");
    assert_eq!(ns.leftover_objects().await, 0);

    ns.cleanup().await;
}

/// Story: Operator syncs a claim and wants stale files gone
///
/// With delete-extraneous the destination ends up an exact mirror of the
/// source.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_mirrors_a_claim_removing_stale_files() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "pv-migrate-mirror").await;
    ns.create_claim("old").await;
    ns.create_claim("new").await;
    ns.run_with_claim("old", "echo fresh > /data/keep").await;
    ns.run_with_claim("new", "echo stale > /data/stale").await;

    migrate(MigrationRequest::new(
        claim(&ns, "old"),
        claim(&ns, "new"),
        RequestOptions::new(true),
    ))
    .await;

    let listing = ns.run_with_claim("new", "ls /data").await;
    assert!(listing.contains("keep"));
    assert!(!listing.contains("stale"));

    ns.cleanup().await;
}

// =============================================================================
// Cross-namespace Stories
// =============================================================================

/// Story: Operator moves data into a new team namespace
///
/// The claims cannot share a pod, so the engine stands up sshd next to the
/// destination and rsyncs over the cluster network.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_copies_a_claim_across_namespaces() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let source = TestNamespace::create(&client, "pv-migrate-src").await;
    let dest = TestNamespace::create(&client, "pv-migrate-dst").await;
    source.create_claim("data").await;
    dest.create_claim("data").await;
    source
        .run_with_claim("data", "seq 1 1000 > /data/numbers")
        .await;

    let strategy = migrate(MigrationRequest::new(
        claim(&source, "data"),
        claim(&dest, "data"),
        RequestOptions::default(),
    ))
    .await;

    assert_eq!(strategy, "rsync-ssh-in-cluster");
    let copied = dest.run_with_claim("data", "wc -l < /data/numbers").await;
    assert_eq!(copied.trim(), "1000");
    assert_eq!(source.leftover_objects().await, 0);
    assert_eq!(dest.leftover_objects().await, 0);

    source.cleanup().await;
    dest.cleanup().await;
}

/// Story: Operator forces the ssh path between two claims in one namespace
///
/// The shared pod would be cheaper, but pinning the run to the in-cluster
/// ssh strategy has to work too: sshd accepts the ephemeral key it was handed
/// and rsync mirrors the tree, extraneous files included.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_forces_the_ssh_path_within_a_namespace() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "pv-migrate-ssh").await;
    ns.create_claim("old").await;
    ns.create_claim("new").await;
    ns.run_with_claim("old", "mkdir -p /data/a/b && echo deep > /data/a/b/file")
        .await;
    ns.run_with_claim("new", "echo stale > /data/stale").await;

    let strategy = migrate(
        MigrationRequest::new(claim(&ns, "old"), claim(&ns, "new"), RequestOptions::new(true))
            .with_strategies(["rsync-ssh-in-cluster"]),
    )
    .await;

    assert_eq!(strategy, "rsync-ssh-in-cluster");
    let copied = ns.run_with_claim("new", "cat /data/a/b/file; ls /data").await;
    assert!(copied.contains("deep"));
    assert!(!copied.contains("stale"));
    assert_eq!(ns.leftover_objects().await, 0);

    ns.cleanup().await;
}
