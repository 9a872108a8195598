//! Bounded polling with a fixed pause between attempts.
//!
//! The pause goes through a [`Sleeper`] so callers (and tests) decide how
//! time actually passes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How many times to ask, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between two attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    10_000
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::Error::Config(
                "discovery max_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Source of delay between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    /// Value returned by the last attempt
    pub value: T,
    /// Attempts made, between 1 and `max_attempts`
    pub attempts: u32,
    /// Whether the last value was accepted
    pub satisfied: bool,
}

/// Run `attempt` until `accept` approves its value or the policy runs out.
///
/// Errors are returned immediately and never retried. There is no pause
/// after the final attempt.
pub async fn poll_until<T, F, Fut, A>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut attempt: F,
    accept: A,
) -> crate::Result<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
    A: Fn(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let value = attempt().await?;

        if accept(&value) {
            return Ok(Polled {
                value,
                attempts,
                satisfied: true,
            });
        }

        if attempts >= max_attempts {
            return Ok(Polled {
                value,
                attempts,
                satisfied: false,
            });
        }

        debug!(
            "Attempt {}/{} not satisfied, waiting {:?}",
            attempts,
            max_attempts,
            policy.backoff()
        );
        sleeper.sleep(policy.backoff()).await;
    }
}
