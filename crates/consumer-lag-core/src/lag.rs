//! Offset snapshots and the lag verdict derived from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Committed and end offset of one partition at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOffsetRecord {
    pub partition_id: i32,
    /// `None` when the group never committed on this partition
    pub committed_offset: Option<i64>,
    /// High-water mark: one past the last written record
    pub end_offset: i64,
}

impl PartitionOffsetRecord {
    pub fn lag(&self) -> PartitionLag {
        match self.committed_offset {
            Some(committed) => PartitionLag::Known(self.end_offset - committed),
            None => PartitionLag::Uncommitted,
        }
    }
}

/// Distance between the end of a partition and the group's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "records")]
pub enum PartitionLag {
    /// `end - committed`; negative if the commit is past the end
    Known(i64),
    /// Nothing committed yet
    Uncommitted,
}

impl PartitionLag {
    /// Whether this partition counts as fully consumed under `policy`.
    pub fn is_caught_up(self, policy: UncommittedPolicy) -> bool {
        match self {
            PartitionLag::Known(lag) => lag == 0,
            PartitionLag::Uncommitted => policy == UncommittedPolicy::CaughtUp,
        }
    }
}

/// What a partition without a committed offset means for the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UncommittedPolicy {
    /// The group is behind on that partition
    #[default]
    Lagging,
    /// The partition is ignored
    CaughtUp,
    /// Evaluation fails with [`Error::UncommittedOffset`]
    Error,
}

impl std::str::FromStr for UncommittedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lagging" => Ok(UncommittedPolicy::Lagging),
            "caught-up" | "caught_up" => Ok(UncommittedPolicy::CaughtUp),
            "error" => Ok(UncommittedPolicy::Error),
            other => Err(Error::Config(format!(
                "unknown uncommitted policy: {}",
                other
            ))),
        }
    }
}

/// Offsets of every discovered partition of one topic for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetSnapshot {
    pub topic: String,
    pub group_id: String,
    /// Capture time (epoch milliseconds)
    pub captured_at: i64,
    pub records: BTreeMap<i32, PartitionOffsetRecord>,
}

impl OffsetSnapshot {
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            captured_at: chrono::Utc::now().timestamp_millis(),
            records: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, record: PartitionOffsetRecord) {
        self.records.insert(record.partition_id, record);
    }

    pub fn get(&self, partition_id: i32) -> Option<&PartitionOffsetRecord> {
        self.records.get(&partition_id)
    }

    pub fn partition_ids(&self) -> Vec<i32> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when every partition has zero lag. Vacuously true when empty.
    ///
    /// Under [`UncommittedPolicy::Error`] every partition is checked for a
    /// missing commit first, so the failure does not depend on which
    /// partition happens to lag.
    pub fn is_caught_up(&self, policy: UncommittedPolicy) -> Result<bool> {
        if policy == UncommittedPolicy::Error {
            if let Some(record) = self
                .records
                .values()
                .find(|record| record.committed_offset.is_none())
            {
                return Err(Error::UncommittedOffset {
                    group_id: self.group_id.clone(),
                    topic: self.topic.clone(),
                    partition: record.partition_id,
                });
            }
        }

        Ok(self
            .records
            .values()
            .all(|record| record.lag().is_caught_up(policy)))
    }
}

/// How partition discovery went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDiscovery {
    /// Partition ids, ascending
    pub partitions: Vec<i32>,
    /// Metadata queries issued
    pub attempts: u32,
    /// Every attempt came back empty
    pub exhausted: bool,
}

/// One row of a [`LagReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLagEntry {
    pub partition_id: i32,
    pub committed_offset: Option<i64>,
    pub end_offset: i64,
    pub lag: PartitionLag,
}

/// Full outcome of a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagReport {
    pub topic: String,
    pub group_id: String,
    pub captured_at: i64,
    pub discovery: PartitionDiscovery,
    pub partitions: Vec<PartitionLagEntry>,
    /// Sum of known lags
    pub total_lag: i64,
    /// Partitions without a committed offset
    pub uncommitted_partitions: usize,
    pub uncommitted_policy: UncommittedPolicy,
    pub caught_up: bool,
}

impl LagReport {
    /// Evaluate a snapshot. Fails only under [`UncommittedPolicy::Error`].
    pub fn evaluate(
        discovery: PartitionDiscovery,
        snapshot: &OffsetSnapshot,
        policy: UncommittedPolicy,
    ) -> Result<Self> {
        let caught_up = snapshot.is_caught_up(policy)?;

        let partitions: Vec<PartitionLagEntry> = snapshot
            .records
            .values()
            .map(|record| PartitionLagEntry {
                partition_id: record.partition_id,
                committed_offset: record.committed_offset,
                end_offset: record.end_offset,
                lag: record.lag(),
            })
            .collect();

        let total_lag = partitions
            .iter()
            .filter_map(|entry| match entry.lag {
                PartitionLag::Known(lag) => Some(lag),
                PartitionLag::Uncommitted => None,
            })
            .sum();

        let uncommitted_partitions = partitions
            .iter()
            .filter(|entry| entry.lag == PartitionLag::Uncommitted)
            .count();

        Ok(Self {
            topic: snapshot.topic.clone(),
            group_id: snapshot.group_id.clone(),
            captured_at: snapshot.captured_at,
            discovery,
            partitions,
            total_lag,
            uncommitted_partitions,
            uncommitted_policy: policy,
            caught_up,
        })
    }

    /// Partitions holding the group back under the report's policy.
    pub fn lagging_partitions(&self) -> Vec<&PartitionLagEntry> {
        self.partitions
            .iter()
            .filter(|entry| !entry.lag.is_caught_up(self.uncommitted_policy))
            .collect()
    }
}
