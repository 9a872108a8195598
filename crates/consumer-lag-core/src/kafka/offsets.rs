//! Offset lookups for lag measurement:
//! - FindCoordinator: locate the broker that stores a group's offsets
//! - OffsetFetch: committed offsets of a group
//! - ListOffsets: end offsets (high-water marks)

use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequestTopic;
use kafka_protocol::messages::{
    ApiKey, BrokerId, FindCoordinatorRequest, FindCoordinatorResponse, GroupId,
    ListOffsetsRequest, ListOffsetsResponse, OffsetFetchRequest, OffsetFetchResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use std::collections::HashMap;
use tracing::debug;

use super::metadata::BrokerMetadata;
use super::KafkaClient;
use crate::error::KafkaError;
use crate::Result;

/// ListOffsets timestamp asking for the latest offset
const LATEST_TIMESTAMP: i64 = -1;

/// READ_UNCOMMITTED: the end offset is the high-water mark
const READ_UNCOMMITTED: i8 = 0;

/// FindCoordinator key type for consumer groups
const GROUP_KEY_TYPE: i8 = 0;

/// Locate the group coordinator.
pub async fn find_coordinator(client: &KafkaClient, group_id: &str) -> Result<BrokerMetadata> {
    let request = FindCoordinatorRequest::default()
        .with_key(StrBytes::from_string(group_id.to_string()))
        .with_key_type(GROUP_KEY_TYPE);

    let response: FindCoordinatorResponse =
        client.send_request(ApiKey::FindCoordinator, request).await?;

    if response.error_code != 0 {
        let detail = response
            .error_message
            .map(|m| m.to_string())
            .unwrap_or_default();
        return Err(KafkaError::BrokerError {
            code: response.error_code,
            message: format!("FindCoordinator for group {} failed: {}", group_id, detail),
        }
        .into());
    }

    let coordinator = BrokerMetadata {
        node_id: response.node_id.0,
        host: response.host.to_string(),
        port: response.port,
    };
    debug!(
        "Coordinator for group {} is broker {} ({})",
        group_id,
        coordinator.node_id,
        coordinator.address()
    );
    Ok(coordinator)
}

/// Committed offsets of `group_id` for the given partitions.
///
/// Must be sent to the group coordinator. A partition the group never
/// committed on maps to `None`.
pub async fn fetch_committed_offsets(
    client: &KafkaClient,
    group_id: &str,
    topic: &str,
    partitions: &[i32],
) -> Result<HashMap<i32, Option<i64>>> {
    let request = OffsetFetchRequest::default()
        .with_group_id(GroupId(StrBytes::from_string(group_id.to_string())))
        .with_topics(Some(vec![OffsetFetchRequestTopic::default()
            .with_name(TopicName(StrBytes::from_string(topic.to_string())))
            .with_partition_indexes(partitions.to_vec())]));

    let response: OffsetFetchResponse = client.send_request(ApiKey::OffsetFetch, request).await?;

    if response.error_code != 0 {
        return Err(KafkaError::BrokerError {
            code: response.error_code,
            message: format!("OffsetFetch for group {} failed", group_id),
        }
        .into());
    }

    let mut offsets = HashMap::new();
    for entry in response.topics {
        if entry.name.as_str() != topic {
            continue;
        }
        for partition in entry.partitions {
            if partition.error_code != 0 {
                return Err(KafkaError::BrokerError {
                    code: partition.error_code,
                    message: format!(
                        "OffsetFetch error for {}:{}",
                        topic, partition.partition_index
                    ),
                }
                .into());
            }
            let committed = (partition.committed_offset >= 0).then_some(partition.committed_offset);
            offsets.insert(partition.partition_index, committed);
        }
    }

    debug!(
        "Fetched {} committed offsets for group {} on {}",
        offsets.len(),
        group_id,
        topic
    );
    Ok(offsets)
}

/// Latest offsets of the given partitions. Must be sent to their leader.
pub async fn list_end_offsets(
    client: &KafkaClient,
    topic: &str,
    partitions: &[i32],
) -> Result<HashMap<i32, i64>> {
    let request_partitions = partitions
        .iter()
        .map(|&partition| {
            ListOffsetsPartition::default()
                .with_partition_index(partition)
                .with_timestamp(LATEST_TIMESTAMP)
        })
        .collect();

    let request = ListOffsetsRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_isolation_level(READ_UNCOMMITTED)
        .with_topics(vec![ListOffsetsTopic::default()
            .with_name(TopicName(StrBytes::from_string(topic.to_string())))
            .with_partitions(request_partitions)]);

    let response: ListOffsetsResponse = client.send_request(ApiKey::ListOffsets, request).await?;

    let mut offsets = HashMap::new();
    for entry in &response.topics {
        if entry.name.as_str() != topic {
            continue;
        }
        for partition in &entry.partitions {
            if partition.error_code != 0 {
                return Err(KafkaError::BrokerError {
                    code: partition.error_code,
                    message: format!(
                        "ListOffsets error for {}:{}",
                        topic, partition.partition_index
                    ),
                }
                .into());
            }
            offsets.insert(partition.partition_index, partition.offset);
        }
    }

    debug!("Fetched {} end offsets for {}", offsets.len(), topic);
    Ok(offsets)
}
