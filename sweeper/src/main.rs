//! EventDesk sweeper
//!
//! One-shot runner for the periodic pipeline sweeps, meant to be invoked by an external
//! scheduler (cron, a Kubernetes `CronJob`, ...). Both sweeps are idempotent, so
//! overlapping or repeated runs are harmless.
//!
//! # Usage
//!
//! ```bash
//! # Record SLA breaches, typically every few minutes
//! eventdesk-sweeper sla
//!
//! # Close approved events whose date has passed, once a day
//! eventdesk-sweeper auto-conclude
//!
//! # Both, applying migrations first
//! eventdesk-sweeper --migrate all
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use eventdesk_core::environment::SystemClock;
use eventdesk_crm::service::SweepReport;
use eventdesk_crm::{Config, PipelineService};
use eventdesk_postgres::PostgresCrmStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// EventDesk sweep runner
#[derive(Parser)]
#[command(name = "eventdesk-sweeper")]
#[command(about = "Runs the EventDesk SLA and auto-conclude sweeps", long_about = None)]
#[command(version)]
struct Cli {
    /// Apply pending database migrations before sweeping
    #[arg(long, env = "EVENTDESK_MIGRATE")]
    migrate: bool,

    #[command(subcommand)]
    sweep: Sweep,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Sweep {
    /// Record SLA violations of events past their critical threshold
    Sla,
    /// Move approved events dated before today to concluded
    AutoConclude,
    /// Run every sweep
    All,
}

impl Sweep {
    const fn includes_sla(self) -> bool {
        matches!(self, Self::Sla | Self::All)
    }

    const fn includes_auto_conclude(self) -> bool {
        matches!(self, Self::AutoConclude | Self::All)
    }
}

fn log_report(sweep: &str, report: &SweepReport) {
    if report.failed > 0 {
        tracing::warn!(
            sweep,
            examined = report.examined,
            changed = report.changed,
            failed = report.failed,
            "Sweep finished with failures"
        );
    } else {
        tracing::info!(
            sweep,
            examined = report.examined,
            changed = report.changed,
            "Sweep finished"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventdesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let offset = config.pipeline.utc_offset_hours;
    let clock = SystemClock::from_hours(offset)
        .with_context(|| format!("invalid UTC offset: {offset} hours"))?;

    let store = PostgresCrmStore::connect(&config.database)
        .await
        .context("connecting to the database")?;
    if cli.migrate {
        store.migrate().await.context("running migrations")?;
    }

    let service = PipelineService::new(Arc::new(store), Arc::new(clock), config)
        .await
        .context("building the pipeline service")?;

    if cli.sweep.includes_sla() {
        let report = service.run_sla_sweep().await.context("SLA sweep")?;
        log_report("sla", &report);
    }
    if cli.sweep.includes_auto_conclude() {
        let report = service
            .run_auto_conclude_sweep()
            .await
            .context("auto-conclude sweep")?;
        log_report("auto_conclude", &report);
    }

    Ok(())
}
