pub mod check;
pub mod describe;

use anyhow::{bail, Context, Result};
use clap::Args;
use consumer_lag_core::{ProbeConfig, RetryPolicy, SecurityProtocol, UncommittedPolicy};
use std::time::Duration;

/// Where to probe. Flags override values from `--config`.
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Path to a YAML probe configuration
    #[arg(short, long)]
    pub config: Option<String>,

    /// Topic to check
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Consumer group to check
    #[arg(short, long)]
    pub group: Option<String>,

    /// Kafka bootstrap servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub bootstrap_servers: Vec<String>,

    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    #[arg(long)]
    pub security_protocol: Option<String>,

    /// Partition discovery attempts before giving up (default: 5)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Seconds between discovery attempts (default: 10)
    #[arg(long)]
    pub backoff_secs: Option<u64>,

    /// Verdict for partitions without a committed offset (lagging, caught-up, error)
    #[arg(long)]
    pub uncommitted: Option<String>,
}

impl ProbeArgs {
    /// Merge the config file (if any) with command line overrides.
    pub fn to_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config {}", path))?,
            None => {
                let (Some(topic), Some(group)) = (&self.topic, &self.group) else {
                    bail!("--topic and --group are required without --config");
                };
                if self.bootstrap_servers.is_empty() {
                    bail!("--bootstrap-servers is required without --config");
                }
                ProbeConfig::new(topic.clone(), self.bootstrap_servers.clone(), group.clone())
            }
        };

        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(group) = &self.group {
            config.group_id = group.clone();
        }
        if !self.bootstrap_servers.is_empty() {
            config.kafka.bootstrap_servers = self.bootstrap_servers.clone();
        }
        if let Some(protocol) = &self.security_protocol {
            config.kafka.security.security_protocol = protocol.parse::<SecurityProtocol>()?;
        }
        if self.max_attempts.is_some() || self.backoff_secs.is_some() {
            config.discovery = RetryPolicy::new(
                self.max_attempts.unwrap_or(config.discovery.max_attempts),
                self.backoff_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.discovery.backoff()),
            );
        }
        if let Some(policy) = &self.uncommitted {
            config.uncommitted = policy.parse::<UncommittedPolicy>()?;
        }

        config.validate()?;
        Ok(config)
    }
}
