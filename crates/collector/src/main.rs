mod cli;

use anyhow::Result;
use checker_collector::{LinkId, settings::Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "checker-collector",
    about = "Buckets link probe observations into durable uptime and latency summaries",
    version,
    author,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with CHECKER__ prefix (e.g., CHECKER__STORE__PATH)
    2. .env file in the current directory
    3. Config file with -c option (see config/default.toml)

Examples:
    # Collect observations streamed as JSON lines
    probe-agent | checker-collector serve

    # Rolled-up status of the wifi link over the last hour
    checker-collector status --link wifi --lookback 1h

    # Per-bucket graph points as CSV
    checker-collector points --link lan --lookback 15m > lan.csv"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    ///
    /// If not provided, will attempt to load from environment variables
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read JSON observations from stdin and flush summaries until stopped
    Serve,
    /// Print the rolled-up summary of a link
    Status {
        #[arg(short, long, value_name = "LINK")]
        link: LinkId,
        /// Window to roll up, e.g. "1h" (defaults to query.status_lookback)
        #[arg(long, value_name = "DURATION")]
        lookback: Option<humantime::Duration>,
    },
    /// Print per-bucket graph points of a link as CSV
    Points {
        #[arg(short, long, value_name = "LINK")]
        link: LinkId,
        /// Window to export, e.g. "15m" (defaults to query.graph_lookback)
        #[arg(long, value_name = "DURATION")]
        lookback: Option<humantime::Duration>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = if let Some(config_path) = &self.config {
            Settings::from_path(config_path)?
        } else {
            Settings::from_env()?
        };
        init_logging(&settings.log_level)?;

        match self.command {
            Commands::Serve => cli::serve::run(&settings).await,
            Commands::Status { link, lookback } => {
                let lookback = match lookback {
                    Some(lookback) => lookback.into(),
                    None => settings.query.status_lookback()?,
                };
                cli::query::status(&settings, link, lookback)
            }
            Commands::Points { link, lookback } => {
                let lookback = match lookback {
                    Some(lookback) => lookback.into(),
                    None => settings.query.graph_lookback()?,
                };
                cli::query::points(&settings, link, lookback)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
