//! Operator CLI for Orka (`spec.md` §6): run a worker, run the scheduler, or
//! inspect/clean up the durable work queue. Mirrors the subcommand shape of
//! the original system's `workers/cli.py`, adapted to Orka's split
//! `task`/`due_work`/`run_log`/`worker_heartbeat` schema.

mod queue;
mod scheduler;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use orka_queue_postgres::PgStore;

#[derive(Parser)]
#[command(name = "orka", about = "Orka durable task orchestrator", version)]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single worker's main loop until interrupted.
    Worker {
        #[command(subcommand)]
        command: worker::WorkerCommand,
    },
    /// Run the scheduler's tick loop until interrupted.
    Scheduler {
        #[command(subcommand)]
        command: scheduler::SchedulerCommand,
    },
    /// Inspect or clean up the durable work queue.
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to database")?;
    orka_queue_postgres::migrate(&pool)
        .await
        .context("failed to run database migrations")?;
    let store = Arc::new(PgStore::new(pool));

    match cli.command {
        Command::Worker { command } => worker::run(store, command).await,
        Command::Scheduler { command } => scheduler::run(store, command).await,
        Command::Queue { command } => queue::run(store, command).await,
    }
}
