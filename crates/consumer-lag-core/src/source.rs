//! Broker-facing seam of the probe.
//!
//! A [`Connector`] opens one session per probe run; the session is an
//! [`OffsetSource`] answering the three questions lag measurement needs.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::Result;

/// Read-only view of a cluster's partitions and offsets.
#[async_trait]
pub trait OffsetSource: Send + Sync {
    /// Partition ids of `topic`, empty while the topic is unknown.
    async fn partitions_for_topic(&self, topic: &str) -> Result<Vec<i32>>;

    /// Last committed offset per partition, `None` if never committed.
    async fn committed_offsets(
        &self,
        group_id: &str,
        topic: &str,
        partitions: &[i32],
    ) -> Result<HashMap<i32, Option<i64>>>;

    /// End offset (high-water mark) per partition.
    async fn end_offsets(&self, topic: &str, partitions: &[i32]) -> Result<HashMap<i32, i64>>;
}

/// Opens sessions against a cluster.
#[async_trait]
pub trait Connector: Send + Sync {
    type Source: OffsetSource;

    async fn connect(&self) -> Result<Self::Source>;
}
