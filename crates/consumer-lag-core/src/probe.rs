//! The lag probe: is a consumer group caught up on a topic?
//!
//! A probe run is a fixed sequence on a fresh session:
//! 1. discover the topic's partitions, polling while metadata is empty
//! 2. read committed and end offsets of every discovered partition
//! 3. compare them
//!
//! Nothing runs concurrently and the session is closed after step 2. The
//! last captured snapshot stays on the probe for inspection.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::error::KafkaError;
use crate::kafka::KafkaConnector;
use crate::lag::{
    LagReport, OffsetSnapshot, PartitionDiscovery, PartitionLag, PartitionOffsetRecord,
    UncommittedPolicy,
};
use crate::retry::{poll_until, RetryPolicy, Sleeper, TokioSleeper};
use crate::source::{Connector, OffsetSource};
use crate::Result;

/// Session opened by discovery and consumed by capture.
struct Session<S> {
    source: S,
    discovery: PartitionDiscovery,
}

/// Checks whether a consumer group has fully consumed a topic.
pub struct LagProbe<C: Connector = KafkaConnector> {
    topic: String,
    group_id: String,
    discovery_policy: RetryPolicy,
    uncommitted: UncommittedPolicy,
    connector: C,
    sleeper: Arc<dyn Sleeper>,
    session: Option<Session<C::Source>>,
    last_snapshot: Option<OffsetSnapshot>,
}

impl LagProbe<KafkaConnector> {
    /// Probe a Kafka cluster. Validates the config; does not connect.
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let connector = KafkaConnector::new(config.kafka.clone(), config.consumer.clone());
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> LagProbe<C> {
    /// Probe through any connector. Validates the config; does not connect.
    pub fn with_connector(config: ProbeConfig, connector: C) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            topic: config.topic,
            group_id: config.group_id,
            discovery_policy: config.discovery,
            uncommitted: config.uncommitted,
            connector,
            sleeper: Arc::new(TokioSleeper),
            session: None,
            last_snapshot: None,
        })
    }

    /// Replace how the probe waits between discovery attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Snapshot from the most recent capture, if any.
    pub fn last_snapshot(&self) -> Option<&OffsetSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Open a session and find the topic's partitions.
    ///
    /// An empty partition set after every attempt is not an error: the
    /// returned discovery is marked `exhausted` instead.
    pub async fn discover_partitions(&mut self) -> Result<PartitionDiscovery> {
        let session = self.open_session().await?;
        let discovery = session.discovery.clone();
        self.session = Some(session);
        Ok(discovery)
    }

    /// Read committed and end offsets for the discovered partitions.
    ///
    /// Reuses the session from [`discover_partitions`](Self::discover_partitions)
    /// or runs discovery first. The session is closed afterwards.
    pub async fn capture_offsets(&mut self) -> Result<OffsetSnapshot> {
        let (_, snapshot) = self.capture().await?;
        Ok(snapshot)
    }

    /// Discover, capture and evaluate in one go.
    pub async fn report(&mut self) -> Result<LagReport> {
        self.discover_partitions().await?;
        let (discovery, snapshot) = self.capture().await?;
        let report = LagReport::evaluate(discovery, &snapshot, self.uncommitted)?;

        for entry in report.lagging_partitions() {
            match entry.lag {
                PartitionLag::Known(lag) => debug!(
                    "{}:{} group {} lag {} (committed {:?}, end {})",
                    report.topic,
                    entry.partition_id,
                    report.group_id,
                    lag,
                    entry.committed_offset,
                    entry.end_offset
                ),
                PartitionLag::Uncommitted => debug!(
                    "{}:{} group {} has no committed offset (end {})",
                    report.topic, entry.partition_id, report.group_id, entry.end_offset
                ),
            }
        }

        info!(
            "Group {} on {}: {} partitions, total lag {}, {} uncommitted, caught up: {}",
            report.group_id,
            report.topic,
            report.partitions.len(),
            report.total_lag,
            report.uncommitted_partitions,
            report.caught_up
        );

        Ok(report)
    }

    /// True only when every partition's lag is exactly zero.
    ///
    /// Vacuously true when the topic has no partitions.
    pub async fn compute_lag(&mut self) -> Result<bool> {
        Ok(self.report().await?.caught_up)
    }

    async fn open_session(&self) -> Result<Session<C::Source>> {
        let source = self.connector.connect().await?;

        let topic = self.topic.as_str();
        let source_ref = &source;
        let polled = poll_until(
            &self.discovery_policy,
            self.sleeper.as_ref(),
            move || source_ref.partitions_for_topic(topic),
            |partitions: &Vec<i32>| !partitions.is_empty(),
        )
        .await?;

        let mut partitions = polled.value;
        partitions.sort_unstable();
        partitions.dedup();

        let discovery = PartitionDiscovery {
            partitions,
            attempts: polled.attempts,
            exhausted: !polled.satisfied,
        };

        if discovery.exhausted {
            warn!(
                "Topic {} still has no partitions after {} attempts",
                self.topic, discovery.attempts
            );
        } else {
            debug!(
                "Discovered {} partitions for {} in {} attempt(s)",
                discovery.partitions.len(),
                self.topic,
                discovery.attempts
            );
        }

        Ok(Session { source, discovery })
    }

    async fn capture(&mut self) -> Result<(PartitionDiscovery, OffsetSnapshot)> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.open_session().await?,
        };

        let partitions = &session.discovery.partitions;
        let mut snapshot = OffsetSnapshot::new(self.topic.as_str(), self.group_id.as_str());

        if !partitions.is_empty() {
            let committed = session
                .source
                .committed_offsets(&self.group_id, &self.topic, partitions)
                .await?;
            let end_offsets = session.source.end_offsets(&self.topic, partitions).await?;

            for &partition_id in partitions {
                let end_offset = end_offsets.get(&partition_id).copied().ok_or_else(|| {
                    KafkaError::PartitionNotAvailable {
                        topic: self.topic.clone(),
                        partition: partition_id,
                    }
                })?;

                snapshot.insert(PartitionOffsetRecord {
                    partition_id,
                    committed_offset: committed.get(&partition_id).copied().flatten(),
                    end_offset,
                });
            }
        }

        self.last_snapshot = Some(snapshot.clone());
        Ok((session.discovery, snapshot))
    }
}
