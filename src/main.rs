use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderflow_sim::config::StoreConfig;
use orderflow_sim::rng::StdRandom;
use orderflow_sim::sim::{DriverConfig, SimulationDriver, TransitionCounts};
use orderflow_sim::store::{OrderStore, PostgresOrderStore};

/// Order lifecycle simulator: advances every active order through its
/// status state machine, either over a span of simulated days (backfill)
/// or in a single pass at the current instant (incremental).
#[derive(Parser, Debug)]
#[command(name = "orderflow-sim", version, about)]
struct Cli {
    /// Run a backfill over this many simulated days; omit for a single
    /// incremental pass at the current time.
    #[arg(long, value_name = "DAYS")]
    simulate_days: Option<u32>,

    /// Backfill start date (YYYY-MM-DD). Defaults to resuming the day
    /// after the latest recorded event, or the earliest order date.
    #[arg(long, value_name = "DATE")]
    start_date: Option<String>,

    /// Seed for reproducible histories; omitted means OS entropy.
    #[arg(long)]
    seed: Option<u64>,

    /// Commit accumulated writes after this many simulated days.
    #[arg(long, default_value_t = 10, value_name = "DAYS")]
    flush_every: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orderflow_sim=debug")),
        )
        .init();

    let cli = Cli::parse();

    let config = StoreConfig::from_env();
    let store = PostgresOrderStore::connect(&config)
        .await
        .context("failed to connect to the order store")?;
    store
        .ensure_schema()
        .await
        .context("failed to ensure event tables")?;

    let rng = match cli.seed {
        Some(seed) => StdRandom::seeded(seed),
        None => StdRandom::new(),
    };
    let mut driver = SimulationDriver::with_config(
        store,
        rng,
        DriverConfig {
            flush_every_days: cli.flush_every,
        },
    );

    let counts = match cli.simulate_days {
        Some(days) => {
            tracing::info!(days, "🚀 simulation mode");
            let start = match &cli.start_date {
                Some(raw) => raw
                    .parse::<NaiveDate>()
                    .with_context(|| format!("invalid --start-date {raw:?}"))?,
                None => match driver.resume_start_date().await? {
                    Some(date) => date,
                    None => {
                        tracing::warn!("no orders in the store; nothing to simulate");
                        return Ok(());
                    }
                },
            };
            tracing::info!(start = %start, "starting from");
            driver.run_backfill(start, days).await?
        }
        None => {
            tracing::info!("🚀 incremental mode");
            driver.run_incremental().await?
        }
    };

    report(&counts);

    let distribution = driver.store().status_distribution().await?;
    for (status, count) in distribution {
        tracing::info!(status = %status, count, "status distribution");
    }

    Ok(())
}

fn report(counts: &TransitionCounts) {
    if counts.total() == 0 {
        tracing::info!("no status changes this run");
        return;
    }
    for (status, count) in counts.pairs() {
        if count > 0 {
            tracing::info!(status, count, "transitions applied");
        }
    }
}
