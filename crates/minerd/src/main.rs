//! minerd: the credit mining daemon.
//!
//! Assembles the credit mining subsystem around simulated collaborators:
//! - Settings (`[credit_mining]` TOML table)
//! - Simulated download engine with on-disk checkpoints
//! - Feed-driven discovery sources
//! - Credit mining manager + status loop
//!
//! # Usage
//!
//! ```text
//! minerd run --config minerd.toml --feed feeds.json --status-interval 5
//! minerd check-config minerd.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mining_core::MiningSettings;

const DEFAULT_LOG_FILTER: &str = "info,minerd=debug,mining=debug";

#[derive(Parser)]
#[command(name = "minerd", about = "Credit mining daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the credit mining manager until interrupted.
    Run {
        /// Settings file with a `[credit_mining]` table. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON file mapping source keys to the swarms they advertise.
        #[arg(long)]
        feed: Option<PathBuf>,

        /// Seconds between engine status batches.
        #[arg(long, default_value = "5")]
        status_interval: u64,

        /// Seconds between discoveries of a paced feed. Whole feed at once when omitted.
        #[arg(long)]
        feed_pace: Option<u64>,

        /// Seed for simulated availability and upload figures.
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Parse and validate a settings file.
    CheckConfig {
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            feed,
            status_interval,
            feed_pace,
            seed,
        } => {
            let settings = match &config {
                Some(path) => MiningSettings::from_file(path)?,
                None => MiningSettings::default(),
            };
            daemon::run(daemon::Options {
                settings,
                feed,
                status_interval,
                feed_pace,
                seed,
            })
            .await
        }
        Command::CheckConfig { path } => {
            let settings = MiningSettings::from_file(&path)?;
            println!("{}", daemon::describe(&settings));
            Ok(())
        }
    }
}
