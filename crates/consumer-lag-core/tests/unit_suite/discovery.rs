//! Partition discovery and its retry loop.

use super::helpers::{capture_logs, orders_config, probe_for, ScriptedCluster};
use consumer_lag_core::RetryPolicy;
use std::time::Duration;

#[tokio::test]
async fn test_topic_visible_immediately() {
    let cluster = ScriptedCluster::with_offsets(&[(0, Some(1), 1), (1, Some(2), 2)]);
    let (mut probe, sleeper) = probe_for(orders_config(), &cluster);

    let discovery = probe.discover_partitions().await.unwrap();

    assert_eq!(discovery.partitions, vec![0, 1]);
    assert_eq!(discovery.attempts, 1);
    assert!(!discovery.exhausted);
    assert!(sleeper.pauses().is_empty());
}

#[tokio::test]
async fn test_topic_appears_after_retries() {
    let cluster = ScriptedCluster::appearing_after(3, &[(0, Some(7), 7), (1, Some(9), 9)]);
    let (mut probe, sleeper) = probe_for(orders_config(), &cluster);

    let discovery = probe.discover_partitions().await.unwrap();

    assert_eq!(discovery.partitions, vec![0, 1]);
    assert_eq!(discovery.attempts, 4);
    assert!(!discovery.exhausted);
    assert_eq!(cluster.metadata_calls(), 4);
    assert_eq!(sleeper.pauses(), vec![Duration::from_secs(10); 3]);

    assert!(probe.compute_lag().await.unwrap());
}

#[tokio::test]
async fn test_topic_never_appears() {
    let cluster = ScriptedCluster::default();
    let (mut probe, sleeper) = probe_for(orders_config(), &cluster);

    let discovery = probe.discover_partitions().await.unwrap();

    assert!(discovery.partitions.is_empty());
    assert_eq!(discovery.attempts, 5);
    assert!(discovery.exhausted);
    assert_eq!(cluster.metadata_calls(), 5);
    assert_eq!(sleeper.pauses(), vec![Duration::from_secs(10); 4]);
}

#[tokio::test]
async fn test_missing_topic_reports_no_lag() {
    let cluster = ScriptedCluster::default();
    let (mut probe, _) = probe_for(orders_config(), &cluster);

    // Vacuous: nothing to check means nothing is behind
    assert!(probe.compute_lag().await.unwrap());

    let report = probe.report().await.unwrap();
    assert!(report.caught_up);
    assert!(report.discovery.exhausted);
    assert!(report.partitions.is_empty());
    assert!(probe.last_snapshot().unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_retry_policy() {
    let cluster = ScriptedCluster::default();
    let mut config = orders_config();
    config.discovery = RetryPolicy::new(2, Duration::from_millis(500));
    let (mut probe, sleeper) = probe_for(config, &cluster);

    let discovery = probe.discover_partitions().await.unwrap();

    assert_eq!(discovery.attempts, 2);
    assert_eq!(cluster.metadata_calls(), 2);
    assert_eq!(sleeper.pauses(), vec![Duration::from_millis(500)]);
}

#[tokio::test]
async fn test_exhausted_discovery_is_logged() {
    let (logs, _guard) = capture_logs();
    let cluster = ScriptedCluster::default();
    let (mut probe, _) = probe_for(orders_config(), &cluster);

    probe.compute_lag().await.unwrap();

    let output = logs.contents();
    assert!(
        output.contains("Topic orders still has no partitions after 5 attempts"),
        "missing warning in: {}",
        output
    );
    assert!(output.contains("WARN"));
}

#[tokio::test(start_paused = true)]
async fn test_default_sleeper_waits_on_tokio_timer() {
    use consumer_lag_core::LagProbe;

    let cluster = ScriptedCluster::appearing_after(2, &[(0, Some(3), 3)]);
    let mut probe = LagProbe::with_connector(orders_config(), cluster.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let discovery = probe.discover_partitions().await.unwrap();

    assert_eq!(discovery.attempts, 3);
    assert!(started.elapsed() >= Duration::from_secs(20));
}
