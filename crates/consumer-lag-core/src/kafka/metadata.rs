//! Kafka Metadata API: brokers and partition leaders of one topic.

use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{ApiKey, MetadataRequest, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::debug;

use super::KafkaClient;
use crate::Result;

/// Broker metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerMetadata {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Partition metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partition_id: i32,
    /// -1 while no leader is elected
    pub leader_id: i32,
}

/// Brokers plus the partitions of the requested topic.
#[derive(Debug, Clone, Default)]
pub struct TopicMetadata {
    pub brokers: Vec<BrokerMetadata>,
    /// Empty when the broker reported a topic-level error
    pub partitions: Vec<PartitionMetadata>,
}

/// Fetch metadata for one topic without triggering auto-creation.
///
/// Topic-level errors (unknown topic, leader not available, ...) are not
/// failures here: metadata may simply not have propagated yet, so they come
/// back as an empty partition list.
pub async fn fetch_topic_metadata(client: &KafkaClient, topic: &str) -> Result<TopicMetadata> {
    let request = MetadataRequest::default()
        .with_topics(Some(vec![MetadataRequestTopic::default()
            .with_name(Some(TopicName(StrBytes::from_string(topic.to_string()))))]))
        .with_allow_auto_topic_creation(false);

    let response: MetadataResponse = client.send_request(ApiKey::Metadata, request).await?;

    let brokers: Vec<BrokerMetadata> = response
        .brokers
        .iter()
        .map(|broker| BrokerMetadata {
            node_id: broker.node_id.0,
            host: broker.host.to_string(),
            port: broker.port,
        })
        .collect();

    let mut partitions = Vec::new();
    for entry in &response.topics {
        let name = entry.name.as_ref().map(|n| n.as_str()).unwrap_or("");
        if name != topic {
            continue;
        }
        if entry.error_code != 0 {
            debug!("Topic {} has error code {}", topic, entry.error_code);
            continue;
        }
        partitions.extend(entry.partitions.iter().map(|p| PartitionMetadata {
            partition_id: p.partition_index,
            leader_id: p.leader_id.0,
        }));
    }
    partitions.sort_by_key(|p| p.partition_id);

    debug!(
        "Topic {}: {} partitions across {} brokers",
        topic,
        partitions.len(),
        brokers.len()
    );

    Ok(TopicMetadata {
        brokers,
        partitions,
    })
}
