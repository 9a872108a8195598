use anyhow::Result;
use consumer_lag_core::{LagProbe, LagReport, PartitionLag};
use tracing::info;

use super::ProbeArgs;

/// Describe command output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "yaml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }
}

pub async fn run(args: &ProbeArgs, format: OutputFormat) -> Result<()> {
    let config = args.to_config()?;

    info!(
        "Describing lag of group {} on topic {}",
        config.group_id, config.topic
    );
    let mut probe = LagProbe::new(config)?;
    let report = probe.report().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Text => println!("{}", render_text(&report)),
    }

    Ok(())
}

fn render_text(report: &LagReport) -> String {
    let captured = chrono::DateTime::from_timestamp_millis(report.captured_at)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    let mut out = String::new();
    out.push_str(&format!("Topic:      {}\n", report.topic));
    out.push_str(&format!("Group:      {}\n", report.group_id));
    out.push_str(&format!("Captured:   {}\n", captured));
    out.push_str(&format!(
        "Discovery:  {} partition(s) in {} attempt(s){}\n",
        report.discovery.partitions.len(),
        report.discovery.attempts,
        if report.discovery.exhausted {
            " (topic not found)"
        } else {
            ""
        }
    ));
    out.push('\n');

    if !report.partitions.is_empty() {
        out.push_str(&format!(
            "{:>9}  {:>14}  {:>14}  {:>10}\n",
            "PARTITION", "COMMITTED", "END", "LAG"
        ));
        for entry in &report.partitions {
            let committed = entry
                .committed_offset
                .map(|offset| offset.to_string())
                .unwrap_or_else(|| "-".to_string());
            let lag = match entry.lag {
                PartitionLag::Known(lag) => lag.to_string(),
                PartitionLag::Uncommitted => "-".to_string(),
            };
            out.push_str(&format!(
                "{:>9}  {:>14}  {:>14}  {:>10}\n",
                entry.partition_id, committed, entry.end_offset, lag
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!("Total lag:  {}\n", report.total_lag));
    if report.uncommitted_partitions > 0 {
        out.push_str(&format!(
            "Uncommitted: {} partition(s), counted as {}\n",
            report.uncommitted_partitions,
            serde_yaml::to_string(&report.uncommitted_policy)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        ));
    }
    out.push_str(&format!(
        "Status:     {}",
        if report.caught_up {
            "CAUGHT UP"
        } else {
            "LAGGING"
        }
    ));
    out
}
