//! Kafka protocol client and the offset source built on it.

mod client;
mod metadata;
mod offsets;
mod source;
mod tls;

pub use client::KafkaClient;
pub use metadata::{fetch_topic_metadata, BrokerMetadata, PartitionMetadata, TopicMetadata};
pub use offsets::{fetch_committed_offsets, find_coordinator, list_end_offsets};
pub use source::{KafkaConnector, KafkaOffsetSource};
