//! Configuration structures for the consumer lag probe.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lag::UncommittedPolicy;
use crate::retry::RetryPolicy;

/// Everything a probe needs: what to look at and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Topic whose partitions are checked
    pub topic: String,

    /// Consumer group whose committed offsets are compared
    pub group_id: String,

    /// Cluster connection settings
    pub kafka: KafkaConfig,

    /// Consumer session parameters
    #[serde(default)]
    pub consumer: ConsumerSettings,

    /// Retry policy for partition discovery
    #[serde(default)]
    pub discovery: RetryPolicy,

    /// How partitions without a committed offset are judged
    #[serde(default)]
    pub uncommitted: UncommittedPolicy,
}

impl ProbeConfig {
    /// Build a config with default consumer, discovery and security settings.
    pub fn new(
        topic: impl Into<String>,
        bootstrap_servers: Vec<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            kafka: KafkaConfig {
                bootstrap_servers,
                security: SecurityConfig::default(),
                connection: ConnectionConfig::default(),
            },
            consumer: ConsumerSettings::default(),
            discovery: RetryPolicy::default(),
            uncommitted: UncommittedPolicy::default(),
        }
    }

    /// Load a config from a YAML file. The result is validated.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: ProbeConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.topic.trim().is_empty() {
            return Err(crate::Error::Config("topic must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(crate::Error::Config(
                "group_id must not be empty".to_string(),
            ));
        }
        self.kafka.validate()?;
        self.consumer.validate()?;
        self.discovery.validate()?;
        Ok(())
    }
}

/// Kafka cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers (host:port)
    pub bootstrap_servers: Vec<String>,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// TCP socket options
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl KafkaConfig {
    /// Same settings, pointed at a single broker address.
    pub fn for_broker(&self, address: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: vec![address.into()],
            security: self.security.clone(),
            connection: self.connection.clone(),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "at least one bootstrap server is required".to_string(),
            ));
        }
        for server in &self.bootstrap_servers {
            match server.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => {
                    return Err(crate::Error::Config(format!(
                        "bootstrap server '{}' is not a host:port address",
                        server
                    )))
                }
            }
        }
        self.security.validate()
    }
}

/// Security configuration for Kafka connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,

    /// SASL mechanism (if using SASL)
    #[serde(default)]
    pub sasl_mechanism: Option<SaslMechanism>,

    /// SASL username
    #[serde(default)]
    pub sasl_username: Option<String>,

    /// SASL password
    #[serde(default)]
    pub sasl_password: Option<String>,

    /// Path to CA certificate file (for TLS)
    #[serde(default)]
    pub ssl_ca_location: Option<PathBuf>,

    /// Path to client certificate file (for mTLS)
    #[serde(default)]
    pub ssl_certificate_location: Option<PathBuf>,

    /// Path to client key file (for mTLS)
    #[serde(default)]
    pub ssl_key_location: Option<PathBuf>,
}

impl SecurityConfig {
    fn validate(&self) -> crate::Result<()> {
        if self.security_protocol.uses_sasl() && self.sasl_mechanism.is_none() {
            return Err(crate::Error::Config(format!(
                "sasl_mechanism is required for {:?}",
                self.security_protocol
            )));
        }
        Ok(())
    }
}

/// Security protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn uses_tls(self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    pub fn uses_sasl(self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

impl std::str::FromStr for SecurityProtocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PLAINTEXT" => Ok(SecurityProtocol::Plaintext),
            "SSL" => Ok(SecurityProtocol::Ssl),
            "SASL_PLAINTEXT" => Ok(SecurityProtocol::SaslPlaintext),
            "SASL_SSL" => Ok(SecurityProtocol::SaslSsl),
            other => Err(crate::Error::Config(format!(
                "unknown security protocol: {}",
                other
            ))),
        }
    }
}

/// SASL mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SaslMechanism {
    Plain,
}

/// TCP options applied to every broker socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,

    #[serde(default = "default_keepalive_time_secs")]
    pub keepalive_time_secs: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: true,
            keepalive_time_secs: default_keepalive_time_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            tcp_nodelay: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keepalive_time_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    20
}

/// Where a fresh consumer would start reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

/// Consumer session parameters used when the probe connects.
///
/// The probe never joins the group or commits, so only `consumer_timeout_ms`
/// changes wire behavior: it bounds every broker round trip. The remaining
/// values are checked for consistency and reported when a session opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Must stay false; the probe is read-only
    #[serde(default)]
    pub enable_auto_commit: bool,

    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: u32,

    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Idle bound for a single broker request
    #[serde(default = "default_consumer_timeout_ms")]
    pub consumer_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            auto_offset_reset: OffsetReset::Latest,
            enable_auto_commit: false,
            max_poll_records: default_max_poll_records(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            consumer_timeout_ms: default_consumer_timeout_ms(),
        }
    }
}

fn default_max_poll_records() -> u32 {
    50
}

fn default_max_poll_interval_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_session_timeout_ms() -> u64 {
    50_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_consumer_timeout_ms() -> u64 {
    100_000
}

impl ConsumerSettings {
    /// Upper bound on a single request/response exchange with a broker.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_timeout_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.enable_auto_commit {
            return Err(crate::Error::Config(
                "enable_auto_commit must be false: the probe never commits offsets".to_string(),
            ));
        }
        if self.max_poll_records == 0 {
            return Err(crate::Error::Config(
                "max_poll_records must be > 0".to_string(),
            ));
        }
        if self.consumer_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "consumer_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms >= self.session_timeout_ms {
            return Err(crate::Error::Config(format!(
                "heartbeat_interval_ms ({}) must be lower than session_timeout_ms ({})",
                self.heartbeat_interval_ms, self.session_timeout_ms
            )));
        }
        if self.session_timeout_ms > self.max_poll_interval_ms {
            return Err(crate::Error::Config(format!(
                "session_timeout_ms ({}) must not exceed max_poll_interval_ms ({})",
                self.session_timeout_ms, self.max_poll_interval_ms
            )));
        }
        Ok(())
    }
}
