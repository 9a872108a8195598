//! [`OffsetSource`] backed by a live Kafka cluster.
//!
//! Requests are routed the way brokers expect them: metadata and coordinator
//! lookups go to the bootstrap connection, OffsetFetch goes to the group
//! coordinator and ListOffsets goes to each partition's leader. Connections
//! to other brokers are opened on first use and live as long as the session.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::metadata::{fetch_topic_metadata, BrokerMetadata};
use super::offsets::{fetch_committed_offsets, find_coordinator, list_end_offsets};
use super::KafkaClient;
use crate::config::{ConsumerSettings, KafkaConfig};
use crate::error::KafkaError;
use crate::source::{Connector, OffsetSource};
use crate::Result;

/// Opens [`KafkaOffsetSource`] sessions.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    config: KafkaConfig,
    consumer: ConsumerSettings,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig, consumer: ConsumerSettings) -> Self {
        Self { config, consumer }
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    type Source = KafkaOffsetSource;

    async fn connect(&self) -> Result<KafkaOffsetSource> {
        let settings = &self.consumer;
        info!(
            "Opening Kafka session (auto_offset_reset={:?}, auto_commit={}, max_poll_records={}, \
             max_poll_interval_ms={}, session_timeout_ms={}, heartbeat_interval_ms={}, consumer_timeout_ms={})",
            settings.auto_offset_reset,
            settings.enable_auto_commit,
            settings.max_poll_records,
            settings.max_poll_interval_ms,
            settings.session_timeout_ms,
            settings.heartbeat_interval_ms,
            settings.consumer_timeout_ms
        );

        let request_timeout = settings.request_timeout();
        let bootstrap = KafkaClient::new(self.config.clone(), request_timeout);
        bootstrap.connect().await?;

        Ok(KafkaOffsetSource {
            config: self.config.clone(),
            request_timeout,
            bootstrap: Arc::new(bootstrap),
            brokers: Mutex::new(HashMap::new()),
            leaders: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        })
    }
}

/// One probe session against a Kafka cluster.
pub struct KafkaOffsetSource {
    config: KafkaConfig,
    request_timeout: Duration,
    bootstrap: Arc<KafkaClient>,

    /// node id -> address, from the last metadata response
    brokers: Mutex<HashMap<i32, BrokerMetadata>>,

    /// (topic, partition) -> leader node id
    leaders: Mutex<HashMap<(String, i32), i32>>,

    /// node id -> open connection
    connections: Mutex<HashMap<i32, Arc<KafkaClient>>>,
}

impl KafkaOffsetSource {
    async fn client_for_node(&self, node_id: i32) -> Result<Arc<KafkaClient>> {
        let broker = self
            .brokers
            .lock()
            .await
            .get(&node_id)
            .cloned()
            .ok_or(KafkaError::UnknownBroker(node_id))?;
        self.client_for_broker(&broker).await
    }

    async fn client_for_broker(&self, broker: &BrokerMetadata) -> Result<Arc<KafkaClient>> {
        let mut connections = self.connections.lock().await;
        if let Some(client) = connections.get(&broker.node_id) {
            return Ok(client.clone());
        }

        let address = broker.address();
        let client = if self.bootstrap.connected_to().await.as_deref() == Some(address.as_str()) {
            self.bootstrap.clone()
        } else {
            debug!("Connecting to broker {} at {}", broker.node_id, address);
            let client = KafkaClient::new(self.config.for_broker(&address), self.request_timeout);
            client.connect().await?;
            Arc::new(client)
        };

        connections.insert(broker.node_id, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl OffsetSource for KafkaOffsetSource {
    async fn partitions_for_topic(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = fetch_topic_metadata(&self.bootstrap, topic).await?;

        {
            let mut brokers = self.brokers.lock().await;
            for broker in metadata.brokers {
                brokers.insert(broker.node_id, broker);
            }
        }

        let mut leaders = self.leaders.lock().await;
        let mut partitions = Vec::with_capacity(metadata.partitions.len());
        for partition in metadata.partitions {
            leaders.insert((topic.to_string(), partition.partition_id), partition.leader_id);
            partitions.push(partition.partition_id);
        }

        Ok(partitions)
    }

    async fn committed_offsets(
        &self,
        group_id: &str,
        topic: &str,
        partitions: &[i32],
    ) -> Result<HashMap<i32, Option<i64>>> {
        if partitions.is_empty() {
            return Ok(HashMap::new());
        }

        let coordinator = find_coordinator(&self.bootstrap, group_id).await?;
        let client = self.client_for_broker(&coordinator).await?;
        let mut offsets = fetch_committed_offsets(&client, group_id, topic, partitions).await?;

        for partition in partitions {
            offsets.entry(*partition).or_insert_with(|| {
                debug!("No offset entry for {}:{}, treating as uncommitted", topic, partition);
                None
            });
        }

        Ok(offsets)
    }

    async fn end_offsets(&self, topic: &str, partitions: &[i32]) -> Result<HashMap<i32, i64>> {
        // None groups partitions without a known leader; they go to bootstrap
        let mut by_leader: BTreeMap<Option<i32>, Vec<i32>> = BTreeMap::new();
        {
            let leaders = self.leaders.lock().await;
            for &partition in partitions {
                let leader = leaders
                    .get(&(topic.to_string(), partition))
                    .copied()
                    .filter(|id| *id >= 0);
                by_leader.entry(leader).or_default().push(partition);
            }
        }

        let mut offsets = HashMap::with_capacity(partitions.len());
        for (leader, leader_partitions) in by_leader {
            let client = match leader {
                Some(node_id) => self.client_for_node(node_id).await?,
                None => self.bootstrap.clone(),
            };
            offsets.extend(list_end_offsets(&client, topic, &leader_partitions).await?);
        }

        if let Some(missing) = partitions.iter().find(|p| !offsets.contains_key(*p)) {
            return Err(KafkaError::PartitionNotAvailable {
                topic: topic.to_string(),
                partition: *missing,
            }
            .into());
        }

        Ok(offsets)
    }
}
