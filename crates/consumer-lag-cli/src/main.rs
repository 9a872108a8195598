use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::ProbeArgs;

#[derive(Parser)]
#[command(name = "consumer-lag")]
#[command(about = "Check whether a Kafka consumer group has caught up on a topic", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Exit 0 when the group has no lag on the topic, 1 when it lags, 2 on error
    Check {
        #[command(flatten)]
        probe: ProbeArgs,
    },

    /// Show committed offset, end offset and lag of every partition
    Describe {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Check { probe } => {
            let outcome = commands::check::run(&probe).await;
            if let Err(e) = &outcome {
                error!("Check failed: {:#}", e);
            }
            Ok(ExitCode::from(commands::check::exit_status(&outcome)))
        }
        Commands::Describe { probe, format } => {
            commands::describe::run(&probe, commands::describe::OutputFormat::from(format.as_str()))
                .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
