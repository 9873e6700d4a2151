use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cputel::telemetry::{self, Generator, QueryService};
use cputel::Config;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Synthetic CPU telemetry generator and query tool.
#[derive(Parser, Debug)]
#[command(name = "cputel", version, about)]
struct Cli {
    /// Config file (defaults to the per-user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reset the series and write samples until interrupted
    Run,
    /// Drop and recreate the series
    Reset,
    /// Most recent samples, newest first
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Every anomaly-flagged sample (capped by query.anomaly_cap)
    Anomalies,
    /// Average CPU usage over a window (defaults to the trailing window)
    Average {
        /// Window start, epoch seconds
        #[arg(long, requires = "end")]
        start: Option<i64>,
        /// Window end, epoch seconds
        #[arg(long, requires = "start")]
        end: Option<i64>,
    },
    /// Last 10 samples, all anomalies and the trailing average
    Report,
    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct AverageOutput {
    window_start: i64,
    window_end: i64,
    average_usage: Option<f64>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "cputel=debug" } else { "cputel=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_generator(config: &Config) -> Result<()> {
    let store = telemetry::open_store(&config.store)?;
    let generator = Generator::new(store, config.generator.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
        }
        on_signal.cancel();
    });

    let stats = generator
        .run(cancel)
        .await
        .context("preparing telemetry series")?;
    print_json(&stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run_generator(&config).await,
        Command::Reset => {
            let store = telemetry::open_store(&config.store)?;
            store
                .reset_series()
                .await
                .with_context(|| format!("resetting series `{}`", store.series()))?;
            tracing::info!(series = store.series(), "series reset");
            Ok(())
        }
        Command::Recent { limit } => {
            let queries = QueryService::new(telemetry::open_store(&config.store)?, &config.query);
            print_json(&queries.recent_samples(limit).await?)
        }
        Command::Anomalies => {
            let queries = QueryService::new(telemetry::open_store(&config.store)?, &config.query);
            print_json(&queries.all_anomalies().await?)
        }
        Command::Average { start, end } => {
            let queries = QueryService::new(telemetry::open_store(&config.store)?, &config.query);
            let (window_start, window_end) = match (start, end) {
                (Some(start), Some(end)) => (start, end),
                _ => queries.last_window(),
            };
            let average_usage = queries.average_usage(window_start, window_end).await?;
            print_json(&AverageOutput {
                window_start,
                window_end,
                average_usage,
            })
        }
        Command::Report => {
            let queries = QueryService::new(telemetry::open_store(&config.store)?, &config.query);
            print_json(&queries.report().await?)
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
