//! Synchronization barrier behavior: convergence, timeout, channel errors
//! and cancellation precedence.

mod common;

use std::time::Duration;

use common::{SRC, addr, txset};
use tokio_util::sync::CancellationToken;

use meridian_admin::{MANAGED_CHANNEL, SyncOutcome, wait_until_converged};
use meridian_instance::{ChannelState, ChannelStatus};
use meridian_instance_mock::MockInstance;

#[tokio::test]
async fn converges_when_applied_covers_required() {
    let instance = MockInstance::new(addr("db1:7401"), 1);
    instance.set_applied(txset(&format!("{SRC}:1-100"))).await;

    let outcome = wait_until_converged(
        &instance,
        &addr("db1:7401"),
        MANAGED_CHANNEL,
        &txset(&format!("{SRC}:1-80")),
        Duration::from_secs(1),
        Duration::from_millis(2),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, SyncOutcome::Converged);
}

#[tokio::test]
async fn reports_timeout_when_the_channel_stays_healthy() {
    let instance = MockInstance::new(addr("db1:7401"), 1);
    instance.set_applied(txset(&format!("{SRC}:1-10"))).await;

    let outcome = wait_until_converged(
        &instance,
        &addr("db1:7401"),
        MANAGED_CHANNEL,
        &txset(&format!("{SRC}:1-100")),
        Duration::from_millis(20),
        Duration::from_millis(2),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, SyncOutcome::TimedOut);
}

#[tokio::test]
async fn channel_errors_surface_before_the_deadline() {
    let instance = MockInstance::new(addr("db1:7401"), 1);
    instance
        .set_channels(vec![ChannelStatus {
            name: MANAGED_CHANNEL.to_string(),
            source: Some(addr("db2:7401")),
            state: ChannelState::Error,
            last_error: Some("access denied for replication user".to_string()),
        }])
        .await;

    let started = tokio::time::Instant::now();
    let outcome = wait_until_converged(
        &instance,
        &addr("db1:7401"),
        MANAGED_CHANNEL,
        &txset(&format!("{SRC}:1-100")),
        Duration::from_secs(60),
        Duration::from_millis(2),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::ChannelError("access denied for replication user".to_string())
    );
    // Reported immediately, not after the 60s deadline.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cancellation_wins_over_an_elapsed_deadline() {
    let instance = MockInstance::new(addr("db1:7401"), 1);

    let cancel = CancellationToken::new();
    cancel.cancel();

    // Both cancellation and timeout are due on the first iteration;
    // cancellation must be the reported outcome.
    let outcome = wait_until_converged(
        &instance,
        &addr("db1:7401"),
        MANAGED_CHANNEL,
        &txset(&format!("{SRC}:1-100")),
        Duration::ZERO,
        Duration::from_millis(2),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(outcome, SyncOutcome::Canceled);
}
