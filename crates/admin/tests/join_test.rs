//! End-to-end join operations against mock instances and the in-memory
//! metastore: success paths, rollback on failure, timeout policies,
//! cancellation, and dry runs.

mod common;

use std::time::Duration;

use common::{SRC, credentials, executed_contains, fixture, txset};

use meridian_admin::{
    AdminErrorKind, ClusterAdmin, JoinOptions, OpState, RecoveryMethod, SyncOutcome,
};
use meridian_instance::Instance;
use meridian_metastore::Metastore;
use meridian_topology::{ClusterName, NodeRole, NodeState};

fn opts(fx: &common::Fixture) -> JoinOptions {
    let mut opts = JoinOptions::new(fx.candidate_addr.clone(), credentials());
    opts.sync_timeout = Duration::from_secs(5);
    opts.sync_poll_interval = Duration::from_millis(2);
    opts
}

#[tokio::test]
async fn add_replica_succeeds_end_to_end() {
    let fx = fixture().await;
    fx.candidate
        .converge_after(txset(&format!("{SRC}:1-100")), 2)
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_replica(opts(&fx)).await.expect("join must succeed");

    assert_eq!(report.state, OpState::Done);
    assert_eq!(report.sync, Some(SyncOutcome::Converged));
    assert_eq!(report.donor, Some(fx.primary_addr.clone()));
    assert_eq!(
        report.recovery.unwrap().method,
        RecoveryMethod::Incremental
    );

    // Durable registration with the right role and final state.
    let id = fx.candidate.node_id().await.unwrap();
    let record = fx.store.node(&id).await.unwrap().expect("node registered");
    assert_eq!(record.role, NodeRole::ReadReplica);
    assert_eq!(record.state, NodeState::Online { writable: false });
    assert_eq!(record.replication_account.as_deref(), Some("meridian_repl_3"));
    assert_eq!(record.source_list, vec![fx.primary_addr.clone()]);

    // The replica was flipped read-only before replication started.
    let writes = fx.candidate.variable_writes().await;
    assert!(
        writes
            .iter()
            .any(|(name, value, _)| name == "read_only" && value == "ON")
    );

    // Account provisioned on the primary, channel started on the candidate.
    assert!(executed_contains(&fx.primary, "CREATE USER 'meridian_repl_3'").await);
    assert!(executed_contains(&fx.primary, "GRANT REPLICATION").await);
    assert!(executed_contains(&fx.candidate, "CHANGE REPLICATION SOURCE").await);
    assert!(executed_contains(&fx.candidate, "START REPLICA FOR CHANNEL 'meridian_applier'").await);

    // Success discards compensations: nothing was ever reversed.
    assert!(!executed_contains(&fx.primary, "DROP USER").await);
    assert!(!executed_contains(&fx.candidate, "STOP REPLICA").await);
}

#[tokio::test]
async fn channel_failure_rolls_back_completely() {
    // Scenario: the join proceeds normally until channel configuration,
    // where the start statement fails.
    let fx = fixture().await;
    fx.candidate.fail_statements_matching("START REPLICA").await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_replica(opts(&fx)).await.expect_err("join must fail");

    // The original channel-configuration error is what surfaces.
    assert_eq!(err.kind(), AdminErrorKind::Instance);
    assert!(err.to_string().contains("START REPLICA"));

    // No trace of the candidate remains in metadata.
    let id = fx.candidate.node_id().await.unwrap();
    assert!(fx.store.node(&id).await.unwrap().is_none());
    assert_eq!(fx.store.nodes().await.unwrap().len(), 2);

    // The replication account is gone, and the channel was torn down last.
    assert!(executed_contains(&fx.primary, "DROP USER IF EXISTS 'meridian_repl_3'").await);
    assert!(executed_contains(&fx.candidate, "STOP REPLICA").await);
    assert!(executed_contains(&fx.candidate, "RESET REPLICA ALL").await);
}

#[tokio::test]
async fn replica_sync_timeout_is_advisory() {
    // Scenario: the replica never converges within the deadline but the
    // channel stays healthy.
    let fx = fixture().await;

    let mut options = opts(&fx);
    options.sync_timeout = Duration::from_millis(30);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin
        .add_replica(options)
        .await
        .expect("advisory timeout must not fail the join");

    assert_eq!(report.sync, Some(SyncOutcome::TimedOut));
    assert_eq!(report.state, OpState::Done);

    // Partial replication state is left intact: still registered, still
    // recovering, channel not torn down.
    let id = fx.candidate.node_id().await.unwrap();
    let record = fx.store.node(&id).await.unwrap().expect("still registered");
    assert_eq!(record.state, NodeState::Recovering);
    assert!(!executed_contains(&fx.candidate, "STOP REPLICA").await);
    assert!(!executed_contains(&fx.primary, "DROP USER").await);
}

#[tokio::test]
async fn member_sync_timeout_is_fatal_and_rolls_back() {
    let fx = fixture().await;

    let mut options = opts(&fx);
    options.sync_timeout = Duration::from_millis(30);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin
        .add_member(options)
        .await
        .expect_err("member join must fail on timeout");

    assert_eq!(err.kind(), AdminErrorKind::SyncTimeout);

    let id = fx.candidate.node_id().await.unwrap();
    assert!(fx.store.node(&id).await.unwrap().is_none());
    assert!(executed_contains(&fx.primary, "DROP USER IF EXISTS 'meridian_repl_3'").await);
    assert!(executed_contains(&fx.candidate, "STOP REPLICA").await);
}

#[tokio::test]
async fn cancellation_rolls_back_and_is_distinct_from_timeout() {
    let fx = fixture().await;

    let mut options = opts(&fx);
    options.sync_timeout = Duration::from_secs(30);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let token = admin.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = admin
        .add_member(options)
        .await
        .expect_err("canceled join must fail");
    assert_eq!(err.kind(), AdminErrorKind::Canceled);

    let id = fx.candidate.node_id().await.unwrap();
    assert!(fx.store.node(&id).await.unwrap().is_none());
    assert!(executed_contains(&fx.primary, "DROP USER IF EXISTS 'meridian_repl_3'").await);
}

#[tokio::test]
async fn irrecoverable_candidate_is_cloned_when_donor_supports_it() {
    let fx = fixture().await;
    fx.candidate.set_applied(txset("")).await;
    fx.primary.set_purged(txset(&format!("{SRC}:1-40"))).await;
    fx.candidate
        .converge_after(txset(&format!("{SRC}:1-100")), 1)
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_replica(opts(&fx)).await.expect("clone join must succeed");

    assert_eq!(report.recovery.unwrap().method, RecoveryMethod::Clone);
    assert!(executed_contains(&fx.candidate, "CLONE INSTANCE FROM").await);
    // The partial-clone compensation was canceled on success, and no
    // rollback ran, so the staging cleanup never executed.
    assert!(!executed_contains(&fx.candidate, "RESET CLONE STAGING").await);
}

#[tokio::test]
async fn recovery_decision_is_immutable_for_the_operation() {
    // The candidate starts missing transactions (Recoverable) and fully
    // converges mid-operation; the recorded decision must still be the one
    // made before provisioning, not a re-evaluation.
    let fx = fixture().await;
    fx.candidate
        .converge_after(txset(&format!("{SRC}:1-100")), 1)
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_replica(opts(&fx)).await.expect("join must succeed");

    let decision = report.recovery.unwrap();
    assert_eq!(decision.method, RecoveryMethod::Incremental);
    assert_eq!(
        decision.comparison,
        meridian_topology::HistoryComparison::Recoverable
    );
}

#[tokio::test]
async fn add_cluster_registers_the_cluster_and_uses_the_cluster_channel() {
    let fx = fixture().await;
    fx.candidate
        .converge_after(txset(&format!("{SRC}:1-100")), 1)
        .await;

    let mut options = opts(&fx);
    options.cluster_name = Some(ClusterName::new("east").unwrap());

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_cluster(options).await.expect("attach must succeed");
    assert_eq!(report.state, OpState::Done);

    let clusters = fx.store.clusters().await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].name.as_str(), "east");
    assert_eq!(
        clusters[0].primary,
        fx.candidate.node_id().await.unwrap()
    );

    assert!(
        executed_contains(&fx.candidate, "FOR CHANNEL 'meridian_cluster_applier'").await
    );
}

#[tokio::test]
async fn failed_cluster_attach_removes_the_cluster_record() {
    let fx = fixture().await;
    fx.candidate.fail_statements_matching("START REPLICA").await;

    let mut options = opts(&fx);
    options.cluster_name = Some(ClusterName::new("east").unwrap());

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    admin.add_cluster(options).await.expect_err("attach must fail");

    assert!(fx.store.clusters().await.unwrap().is_empty());
    let id = fx.candidate.node_id().await.unwrap();
    assert!(fx.store.node(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn dry_run_plans_without_mutating() {
    let fx = fixture().await;

    let mut options = opts(&fx);
    options.dry_run = true;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_member(options).await.expect("dry run must succeed");

    assert!(report.dry_run);
    assert_eq!(report.state, OpState::Done);
    assert!(!report.actions.is_empty());
    assert!(report.actions.iter().any(|a| a.contains("replication account")));
    assert!(report.actions.iter().any(|a| a.contains("register node")));

    // Nothing was executed or written anywhere.
    assert!(fx.primary.executed_statements().await.is_empty());
    assert!(fx.candidate.executed_statements().await.is_empty());
    assert_eq!(fx.store.nodes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn undo_retries_compensations_that_failed_during_rollback() {
    let fx = fixture().await;
    fx.candidate.fail_statements_matching("START REPLICA").await;
    // The channel teardown compensation will fail too, at first.
    fx.candidate.fail_statements_matching("STOP REPLICA").await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    admin.add_replica(opts(&fx)).await.expect_err("join must fail");

    // Metadata and account were still reversed despite the teardown failure.
    let id = fx.candidate.node_id().await.unwrap();
    assert!(fx.store.node(&id).await.unwrap().is_none());
    assert!(executed_contains(&fx.primary, "DROP USER IF EXISTS 'meridian_repl_3'").await);

    // First retry still fails; after the blockage clears, undo completes.
    assert_eq!(admin.undo().await, 1);
    fx.candidate.clear_scripted_failures().await;
    assert_eq!(admin.undo().await, 0);
    assert!(executed_contains(&fx.candidate, "RESET REPLICA ALL").await);

    // Nothing left to retry.
    assert_eq!(admin.undo().await, 0);
}
