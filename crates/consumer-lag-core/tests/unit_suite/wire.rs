//! Kafka requests and responses over real sockets.

use super::scripted_broker::{BrokerScript, ScriptedBrokers, NOT_COORDINATOR};
use consumer_lag_core::kafka::{
    fetch_committed_offsets, fetch_topic_metadata, find_coordinator, list_end_offsets,
};
use consumer_lag_core::{
    Connector, Error, KafkaClient, KafkaConnector, KafkaError, LagProbe, OffsetSource,
    PartitionLag, ProbeConfig,
};
use kafka_protocol::messages::ApiKey;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// UNKNOWN_TOPIC_OR_PARTITION
const UNKNOWN_TOPIC: i16 = 3;
/// LEADER_NOT_AVAILABLE
const LEADER_NOT_AVAILABLE: i16 = 5;

fn config_for(brokers: &ScriptedBrokers) -> ProbeConfig {
    ProbeConfig::new("orders", vec![brokers.address(0)], "billing")
}

async fn bootstrap_client(brokers: &ScriptedBrokers) -> KafkaClient {
    let client = KafkaClient::new(config_for(brokers).kafka, Duration::from_secs(5));
    client.connect().await.expect("connect to scripted broker");
    client
}

/// Partitions 0..3 led by nodes 0, 1, 1; node 1 coordinates.
fn two_node_script() -> BrokerScript {
    BrokerScript {
        topic: "orders".to_string(),
        leaders: BTreeMap::from([(2, 1), (0, 0), (1, 1)]),
        coordinator: 1,
        committed: HashMap::from([(0, 100), (1, 50), (2, 30)]),
        end: HashMap::from([(0, 100), (1, 50), (2, 30)]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_metadata_lists_partitions_and_leaders() {
    let brokers = ScriptedBrokers::start(2, two_node_script()).await;
    let client = bootstrap_client(&brokers).await;

    let metadata = fetch_topic_metadata(&client, "orders").await.unwrap();

    let layout: Vec<(i32, i32)> = metadata
        .partitions
        .iter()
        .map(|p| (p.partition_id, p.leader_id))
        .collect();
    assert_eq!(layout, vec![(0, 0), (1, 1), (2, 1)]);

    let addresses: Vec<String> = metadata.brokers.iter().map(|b| b.address()).collect();
    assert_eq!(addresses, vec![brokers.address(0), brokers.address(1)]);
}

#[tokio::test]
async fn test_topic_error_reads_as_no_partitions() {
    let mut script = two_node_script();
    script.topic_error = UNKNOWN_TOPIC;
    let brokers = ScriptedBrokers::start(1, script).await;
    let client = bootstrap_client(&brokers).await;

    let metadata = fetch_topic_metadata(&client, "orders").await.unwrap();

    assert!(metadata.partitions.is_empty());
    assert_eq!(metadata.brokers.len(), 1);
}

#[tokio::test]
async fn test_never_committed_offset_reads_as_none() {
    let script = BrokerScript::single_node("orders", &[(0, Some(10), 10), (1, None, 7)]);
    let brokers = ScriptedBrokers::start(1, script).await;
    let client = bootstrap_client(&brokers).await;

    let coordinator = find_coordinator(&client, "billing").await.unwrap();
    assert_eq!(coordinator.node_id, 0);
    assert_eq!(coordinator.address(), brokers.address(0));

    let committed = fetch_committed_offsets(&client, "billing", "orders", &[0, 1])
        .await
        .unwrap();
    assert_eq!(committed, HashMap::from([(0, Some(10)), (1, None)]));
}

#[tokio::test]
async fn test_offset_fetch_outside_coordinator_fails() {
    let brokers = ScriptedBrokers::start(2, two_node_script()).await;
    let client = bootstrap_client(&brokers).await;

    let err = fetch_committed_offsets(&client, "billing", "orders", &[0])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Kafka(KafkaError::BrokerError { code, .. }) if code == NOT_COORDINATOR
    ));
}

#[tokio::test]
async fn test_partition_error_code_becomes_broker_error() {
    let mut script = BrokerScript::single_node("orders", &[(0, Some(1), 1), (1, Some(2), 2)]);
    script.end_errors.insert(1, LEADER_NOT_AVAILABLE);
    let brokers = ScriptedBrokers::start(1, script).await;
    let client = bootstrap_client(&brokers).await;

    let err = list_end_offsets(&client, "orders", &[0, 1]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Kafka(KafkaError::BrokerError { code, .. }) if code == LEADER_NOT_AVAILABLE
    ));
}

#[tokio::test]
async fn test_end_offsets_read_high_water_mark() {
    let script = BrokerScript::single_node("orders", &[(0, Some(1), 41), (1, None, 9)]);
    let brokers = ScriptedBrokers::start(1, script).await;
    let client = bootstrap_client(&brokers).await;

    let ends = list_end_offsets(&client, "orders", &[0, 1]).await.unwrap();
    assert_eq!(ends, HashMap::from([(0, 41), (1, 9)]));
}

#[tokio::test]
async fn test_missing_end_offset_is_partition_not_available() {
    let mut script =
        BrokerScript::single_node("orders", &[(0, Some(1), 1), (1, Some(1), 1), (2, Some(1), 1)]);
    script.end_omitted.insert(2);
    let brokers = ScriptedBrokers::start(1, script).await;

    let config = config_for(&brokers);
    let source = KafkaConnector::new(config.kafka, config.consumer)
        .connect()
        .await
        .unwrap();
    let partitions = source.partitions_for_topic("orders").await.unwrap();
    assert_eq!(partitions, vec![0, 1, 2]);

    let err = source.end_offsets("orders", &partitions).await.unwrap_err();
    match err {
        Error::Kafka(KafkaError::PartitionNotAvailable { topic, partition }) => {
            assert_eq!(topic, "orders");
            assert_eq!(partition, 2);
        }
        other => panic!("expected PartitionNotAvailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_requests_follow_leaders_and_coordinator() {
    let brokers = ScriptedBrokers::start(2, two_node_script()).await;
    let mut probe = LagProbe::new(config_for(&brokers)).unwrap();

    assert!(probe.compute_lag().await.unwrap());

    // Node 0 is bootstrap and leader of p0; node 1 coordinates and leads p1, p2
    assert_eq!(
        brokers.requests_to(0),
        vec![ApiKey::Metadata, ApiKey::FindCoordinator, ApiKey::ListOffsets]
    );
    assert_eq!(
        brokers.requests_to(1),
        vec![ApiKey::OffsetFetch, ApiKey::ListOffsets]
    );

    // The bootstrap connection serves p0; the coordinator connection serves p1, p2
    assert_eq!(brokers.connections_to(0), 1);
    assert_eq!(brokers.connections_to(1), 1);
}

#[tokio::test]
async fn test_report_over_wire() {
    let script = BrokerScript::single_node("orders", &[(0, Some(8), 10), (1, None, 4)]);
    let brokers = ScriptedBrokers::start(1, script).await;
    let mut probe = LagProbe::new(config_for(&brokers)).unwrap();

    let report = probe.report().await.unwrap();

    assert!(!report.caught_up);
    assert_eq!(report.total_lag, 2);
    assert_eq!(report.partitions[0].lag, PartitionLag::Known(2));
    assert_eq!(report.partitions[1].lag, PartitionLag::Uncommitted);
    assert_eq!(report.partitions[1].end_offset, 4);
}
