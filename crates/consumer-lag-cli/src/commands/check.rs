use anyhow::Result;
use consumer_lag_core::LagProbe;
use tracing::info;

use super::ProbeArgs;

/// Group has consumed everything
pub const EXIT_CAUGHT_UP: u8 = 0;
/// Group is behind on at least one partition
pub const EXIT_LAGGING: u8 = 1;
/// The check itself could not complete
pub const EXIT_ERROR: u8 = 2;

/// Returns whether the group has caught up; the caller maps it to the exit code.
pub async fn run(args: &ProbeArgs) -> Result<bool> {
    let config = args.to_config()?;
    let topic = config.topic.clone();
    let group = config.group_id.clone();

    info!("Checking group {} on topic {}", group, topic);
    let mut probe = LagProbe::new(config)?;
    let caught_up = probe.compute_lag().await?;

    if caught_up {
        println!("Group {} has caught up on {}", group, topic);
    } else {
        println!("Group {} is behind on {}", group, topic);
    }

    Ok(caught_up)
}

/// Process exit status for a check outcome.
pub fn exit_status(outcome: &Result<bool>) -> u8 {
    match outcome {
        Ok(true) => EXIT_CAUGHT_UP,
        Ok(false) => EXIT_LAGGING,
        Err(_) => EXIT_ERROR,
    }
}
