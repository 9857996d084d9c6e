//! `orka scheduler run` (`spec.md` §4.3).

use std::env;
use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use tracing::info;

use orka_queue_postgres::PgStore;
use orka_scheduler::{Scheduler, DEFAULT_BACKLOG_CAP};

#[derive(Subcommand)]
pub enum SchedulerCommand {
    /// Start the scheduler's tick loop: restart catch-up, then materialize
    /// due occurrences as they arrive.
    Run,
}

pub async fn run(store: Arc<PgStore>, command: SchedulerCommand) -> Result<()> {
    let SchedulerCommand::Run = command;
    let backlog_cap = env::var("SCHEDULER_BACKLOG_CAP")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BACKLOG_CAP);

    let scheduler = Arc::new(Scheduler::new(store.clone(), store.clone(), backlog_cap));
    let shutdown = CancellationToken::new();

    let run_handle = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orka_scheduler::tick::run(scheduler, shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    let _ = run_handle.await;

    Ok(())
}
