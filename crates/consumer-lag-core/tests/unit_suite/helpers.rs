//! Test helper utilities.
//!
//! A scripted cluster standing in for Kafka, a sleeper that only records,
//! and a scoped log capture.

use async_trait::async_trait;
use consumer_lag_core::{
    Connector, KafkaError, LagProbe, OffsetSource, ProbeConfig, Result, Sleeper,
};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// (partition, committed, end)
pub type OffsetRow = (i32, Option<i64>, i64);

#[derive(Default)]
struct ClusterState {
    /// Answers for the first metadata queries, oldest first
    scripted_partitions: VecDeque<Vec<i32>>,
    /// Answer once the script is used up
    partitions: Vec<i32>,
    committed: HashMap<i32, Option<i64>>,
    end: HashMap<i32, i64>,
    connects: u32,
    metadata_calls: u32,
    refuse_connections: bool,
    fail_end_offsets: bool,
}

/// In-memory cluster; clones share state.
#[derive(Clone, Default)]
pub struct ScriptedCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl ScriptedCluster {
    /// A topic with the given offsets, visible from the first query.
    pub fn with_offsets(rows: &[OffsetRow]) -> Self {
        let cluster = Self::default();
        {
            let mut state = cluster.state.lock().unwrap();
            for &(partition, committed, end) in rows {
                state.partitions.push(partition);
                state.committed.insert(partition, committed);
                state.end.insert(partition, end);
            }
        }
        cluster
    }

    /// A topic whose metadata comes back empty for the first `empty_queries`.
    pub fn appearing_after(empty_queries: usize, rows: &[OffsetRow]) -> Self {
        let cluster = Self::with_offsets(rows);
        cluster
            .state
            .lock()
            .unwrap()
            .scripted_partitions
            .extend(std::iter::repeat(Vec::new()).take(empty_queries));
        cluster
    }

    pub fn refusing_connections() -> Self {
        let cluster = Self::default();
        cluster.state.lock().unwrap().refuse_connections = true;
        cluster
    }

    pub fn failing_end_offsets(self) -> Self {
        self.state.lock().unwrap().fail_end_offsets = true;
        self
    }

    /// Move the end of a partition, as a producer would.
    pub fn set_end_offset(&self, partition: i32, end: i64) {
        self.state.lock().unwrap().end.insert(partition, end);
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn metadata_calls(&self) -> u32 {
        self.state.lock().unwrap().metadata_calls
    }
}

/// Session handed out by [`ScriptedCluster`].
pub struct ScriptedSession {
    cluster: ScriptedCluster,
}

#[async_trait]
impl Connector for ScriptedCluster {
    type Source = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connections {
            return Err(KafkaError::ConnectionFailed {
                broker: "localhost:9092".to_string(),
                message: "connection refused".to_string(),
            }
            .into());
        }
        state.connects += 1;
        Ok(ScriptedSession {
            cluster: self.clone(),
        })
    }
}

#[async_trait]
impl OffsetSource for ScriptedSession {
    async fn partitions_for_topic(&self, _topic: &str) -> Result<Vec<i32>> {
        let mut state = self.cluster.state.lock().unwrap();
        state.metadata_calls += 1;
        match state.scripted_partitions.pop_front() {
            Some(answer) => Ok(answer),
            None => Ok(state.partitions.clone()),
        }
    }

    async fn committed_offsets(
        &self,
        _group_id: &str,
        _topic: &str,
        partitions: &[i32],
    ) -> Result<HashMap<i32, Option<i64>>> {
        let state = self.cluster.state.lock().unwrap();
        Ok(partitions
            .iter()
            .map(|p| (*p, state.committed.get(p).copied().flatten()))
            .collect())
    }

    async fn end_offsets(&self, topic: &str, partitions: &[i32]) -> Result<HashMap<i32, i64>> {
        let state = self.cluster.state.lock().unwrap();
        if state.fail_end_offsets {
            return Err(KafkaError::BrokerError {
                code: 6,
                message: format!("ListOffsets error for {}", topic),
            }
            .into());
        }
        Ok(partitions
            .iter()
            .filter_map(|p| state.end.get(p).map(|end| (*p, *end)))
            .collect())
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}

pub fn orders_config() -> ProbeConfig {
    ProbeConfig::new("orders", vec!["localhost:9092".to_string()], "billing")
}

/// Probe over `cluster` with a recording sleeper.
pub fn probe_for(
    config: ProbeConfig,
    cluster: &ScriptedCluster,
) -> (LagProbe<ScriptedCluster>, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let probe = LagProbe::with_connector(config, cluster.clone())
        .expect("valid config")
        .with_sleeper(sleeper.clone());
    (probe, sleeper)
}

/// Log output captured while the returned guard is alive.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Install a subscriber for the current thread only.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
