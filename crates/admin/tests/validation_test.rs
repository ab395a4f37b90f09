//! Precondition validation and source resolution: rejections happen before
//! any mutation, decisions are repeatable, and donor choice is
//! deterministic.

mod common;

use std::time::Duration;

use common::{SRC, addr, credentials, fixture, register_member, standalone, txset};

use meridian_admin::{AdminErrorKind, ClusterAdmin, JoinOptions, SourcePolicy};
use meridian_instance::{ChannelState, ChannelStatus, LocalMetadata, ServerVersion};
use meridian_metastore::Metastore;
use meridian_topology::{ClusterName, NodeRole, NodeState};

fn dry_opts(fx: &common::Fixture) -> JoinOptions {
    let mut opts = JoinOptions::new(fx.candidate_addr.clone(), credentials());
    opts.dry_run = true;
    opts.sync_timeout = Duration::from_secs(1);
    opts.sync_poll_interval = Duration::from_millis(2);
    opts
}

async fn assert_no_mutations(fx: &common::Fixture) {
    assert!(fx.primary.executed_statements().await.is_empty());
    assert!(fx.secondary.executed_statements().await.is_empty());
    assert!(fx.candidate.executed_statements().await.is_empty());
    assert_eq!(fx.store.nodes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn validation_is_idempotent_for_acceptance_and_rejection() {
    let fx = fixture().await;
    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());

    // Accepted twice with no state change in between.
    let first = admin.add_member(dry_opts(&fx)).await.expect("first dry run");
    let second = admin.add_member(dry_opts(&fx)).await.expect("second dry run");
    assert_eq!(first.actions, second.actions);

    // Rejected twice, same kind both times.
    let colliding_addr = addr("db4:7401");
    standalone(&fx.connector, &colliding_addr, 2, 40).await;
    let mut opts = dry_opts(&fx);
    opts.address = colliding_addr;
    let err1 = admin.add_member(opts.clone()).await.expect_err("server id collides");
    let err2 = admin.add_member(opts).await.expect_err("still collides");
    assert_eq!(err1.kind(), AdminErrorKind::Conflict);
    assert_eq!(err2.kind(), AdminErrorKind::Conflict);
}

#[tokio::test]
async fn duplicate_source_entries_are_caught_on_canonical_addresses() {
    // Scenario: the list names the primary twice, the second time through
    // an alias, so raw string comparison would miss it.
    let fx = fixture().await;
    let alias = addr("db1-alias:7401");
    fx.connector.alias(alias.clone(), fx.primary_addr.clone()).await;

    let mut opts = dry_opts(&fx);
    opts.dry_run = false;
    opts.source_policy = SourcePolicy::Custom(vec![
        fx.primary_addr.clone(),
        fx.secondary_addr.clone(),
        alias,
    ]);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(opts).await.expect_err("duplicate must fail");

    assert_eq!(err.kind(), AdminErrorKind::Conflict);
    assert!(err.to_string().contains("duplicate"));
    assert_no_mutations(&fx).await;
}

#[tokio::test]
async fn irrecoverable_history_without_clone_fails_with_zero_mutations() {
    // Scenario: donor purged the candidate's gap, clone is unsupported by
    // the donor's version, and no operator is present to confirm anything.
    let fx = fixture().await;
    fx.candidate.set_applied(txset("")).await;
    fx.primary.set_purged(txset(&format!("{SRC}:1-40"))).await;
    fx.primary
        .set_version(ServerVersion::new(8, 0, 30))
        .await;

    let mut opts = dry_opts(&fx);
    opts.dry_run = false;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(opts).await.expect_err("must fail");

    assert_eq!(err.kind(), AdminErrorKind::IrrecoverableHistory);
    assert_no_mutations(&fx).await;
}

#[tokio::test]
async fn operator_assertion_downgrades_irrecoverable_to_recoverable() {
    let fx = fixture().await;
    fx.candidate.set_applied(txset("")).await;
    fx.primary.set_purged(txset(&format!("{SRC}:1-40"))).await;
    fx.primary.set_version(ServerVersion::new(8, 0, 30)).await;

    let mut opts = dry_opts(&fx);
    opts.history_is_known_complete = true;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let report = admin.add_member(opts).await.expect("assertion unblocks the join");
    assert_eq!(
        report.recovery.unwrap().method,
        meridian_admin::RecoveryMethod::Incremental
    );
}

#[tokio::test]
async fn donor_resolution_is_deterministic() {
    let fx = fixture().await;

    // A second online secondary with a higher node id.
    let extra_addr = addr("db5:7401");
    let extra = standalone(&fx.connector, &extra_addr, 5, 5).await;
    extra.set_state(NodeState::Online { writable: false }).await;
    extra.set_applied(txset(&format!("{SRC}:1-100"))).await;
    register_member(&fx.store, &extra, NodeRole::Member, false).await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());

    // Secondary policy: same snapshot, same donor, every time.
    for _ in 0..3 {
        let mut opts = dry_opts(&fx);
        opts.source_policy = SourcePolicy::Secondary;
        let report = admin.add_replica(opts).await.expect("dry run");
        assert_eq!(report.donor, Some(fx.secondary_addr.clone()));
    }

    // Custom policy: the first entry is the donor.
    for _ in 0..3 {
        let mut opts = dry_opts(&fx);
        opts.source_policy =
            SourcePolicy::Custom(vec![extra_addr.clone(), fx.primary_addr.clone()]);
        let report = admin.add_replica(opts).await.expect("dry run");
        assert_eq!(report.donor, Some(extra_addr.clone()));
    }
}

#[tokio::test]
async fn read_replicas_cannot_feed_other_nodes() {
    let fx = fixture().await;
    let replica_addr = addr("db6:7401");
    let replica = standalone(&fx.connector, &replica_addr, 6, 6).await;
    replica.set_state(NodeState::Online { writable: false }).await;
    register_member(&fx.store, &replica, NodeRole::ReadReplica, false).await;

    let mut opts = dry_opts(&fx);
    opts.source_policy = SourcePolicy::Custom(vec![replica_addr]);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_replica(opts).await.expect_err("replica source must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("read replica"));
}

#[tokio::test]
async fn unregistered_sources_are_rejected() {
    let fx = fixture().await;
    let outsider_addr = addr("db7:7401");
    standalone(&fx.connector, &outsider_addr, 7, 7).await;

    let mut opts = dry_opts(&fx);
    opts.source_policy = SourcePolicy::Custom(vec![outsider_addr]);

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_replica(opts).await.expect_err("outsider must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("not a registered topology member"));
}

#[tokio::test]
async fn unreachable_target_is_reported_with_role() {
    let fx = fixture().await;
    fx.connector.set_unreachable(fx.candidate_addr.clone()).await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Unreachable);
    assert!(err.to_string().contains("target"));
}

#[tokio::test]
async fn existing_membership_blocks_the_join_but_stale_claims_do_not() {
    let fx = fixture().await;
    let topology_id = fx.store.topology_id().await.unwrap();

    // Stale claim: candidate believes it belongs here, registry disagrees.
    // That is the forcibly-removed case and the join may proceed.
    fx.candidate
        .set_local_metadata(Some(LocalMetadata {
            topology_id,
            cluster_name: None,
        }))
        .await;
    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    admin
        .add_member(dry_opts(&fx))
        .await
        .expect("stale claim must not block a re-add");

    // Live membership: registered and claiming membership.
    register_member(&fx.store, &fx.candidate, NodeRole::Member, false).await;
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("already a member"));
}

#[tokio::test]
async fn membership_in_another_topology_blocks_the_join() {
    let fx = fixture().await;
    fx.candidate
        .set_local_metadata(Some(LocalMetadata {
            topology_id: uuid::Uuid::new_v4(),
            cluster_name: None,
        }))
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("another")
        || err.to_string().contains("belongs to topology"));
}

#[tokio::test]
async fn unmanaged_replication_channels_block_the_join() {
    let fx = fixture().await;
    fx.candidate
        .set_channels(vec![ChannelStatus {
            name: "legacy_feed".to_string(),
            source: None,
            state: ChannelState::Off,
            last_error: None,
        }])
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("legacy_feed"));
}

#[tokio::test]
async fn old_candidate_versions_are_rejected() {
    let fx = fixture().await;
    fx.candidate.set_version(ServerVersion::new(7, 9, 9)).await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("below the minimum"));
}

#[tokio::test]
async fn mutations_require_a_reachable_majority() {
    let fx = fixture().await;
    fx.connector.set_unreachable(fx.secondary_addr.clone()).await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_member(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("quorum"));
}

#[tokio::test]
async fn cluster_names_collide_case_insensitively() {
    let fx = fixture().await;

    let mut first = dry_opts(&fx);
    first.dry_run = false;
    first.cluster_name = Some(ClusterName::new("East").unwrap());
    fx.candidate
        .converge_after(txset(&format!("{SRC}:1-100")), 1)
        .await;

    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    admin.add_cluster(first).await.expect("first attach succeeds");

    // A second cluster whose name differs only by case.
    let second_addr = addr("db8:7401");
    let second = standalone(&fx.connector, &second_addr, 8, 8).await;
    second.set_applied(txset(&format!("{SRC}:1-100"))).await;

    let mut opts = JoinOptions::new(second_addr, credentials());
    opts.cluster_name = Some(ClusterName::new("EAST").unwrap());
    let err = admin.add_cluster(opts).await.expect_err("collision must fail");
    assert_eq!(err.kind(), AdminErrorKind::Conflict);
}

#[tokio::test]
async fn attaching_a_cluster_requires_a_name() {
    let fx = fixture().await;
    let mut admin = ClusterAdmin::new(fx.connector.clone(), fx.store.clone());
    let err = admin.add_cluster(dry_opts(&fx)).await.expect_err("must fail");
    assert_eq!(err.kind(), AdminErrorKind::Validation);
    assert!(err.to_string().contains("cluster name"));
}
