//! Consumer Lag Core Library
//!
//! Answers one question about a Kafka cluster: has a consumer group consumed
//! every record of a topic? [`LagProbe`] discovers the topic's partitions,
//! compares the group's committed offsets with the partitions' end offsets
//! and reports whether all lags are zero.

pub mod config;
pub mod error;
pub mod kafka;
pub mod lag;
pub mod probe;
pub mod retry;
pub mod source;

pub use config::{
    ConnectionConfig, ConsumerSettings, KafkaConfig, OffsetReset, ProbeConfig, SaslMechanism,
    SecurityConfig, SecurityProtocol,
};
pub use error::{Error, KafkaError, Result};
pub use kafka::{KafkaClient, KafkaConnector, KafkaOffsetSource};
pub use lag::{
    LagReport, OffsetSnapshot, PartitionDiscovery, PartitionLag, PartitionLagEntry,
    PartitionOffsetRecord, UncommittedPolicy,
};
pub use probe::LagProbe;
pub use retry::{poll_until, Polled, RetryPolicy, Sleeper, TokioSleeper};
pub use source::{Connector, OffsetSource};
