//! Error types for the consumer lag probe.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the consumer lag probe.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka protocol error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The group has never committed an offset for a partition and the
    /// uncommitted policy asks for a hard failure.
    #[error("Group {group_id} has no committed offset for {topic}:{partition}")]
    UncommittedOffset {
        group_id: String,
        topic: String,
        partition: i32,
    },
}

/// Kafka-specific errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KafkaError {
    /// Connection failed
    #[error("Failed to connect to broker {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker error response
    #[error("Broker returned error code {code}: {message}")]
    BrokerError { code: i16, message: String },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No available brokers
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Broker id referenced by metadata but not described in it
    #[error("Unknown broker id {0}")]
    UnknownBroker(i32),

    /// Partition not available
    #[error("Partition {partition} not available for topic {topic}")]
    PartitionNotAvailable { topic: String, partition: i32 },

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Certificate or key loading error
    #[error("Failed to load {path}: {message}")]
    PemLoad { path: String, message: String },
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
