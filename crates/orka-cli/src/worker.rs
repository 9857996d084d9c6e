//! `orka worker run` (`spec.md` §4.4 / `workers/runner.py`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use orka_executor::PipelineExecutor;
use orka_queue_postgres::PgStore;
use orka_worker::{HttpToolInvoker, Worker, WorkerConfig};

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Start the per-worker main loop: heartbeat, reap, lease, execute, retry.
    Run {
        /// Stable identity for this worker; a random id is generated if omitted.
        #[arg(long)]
        worker_id: Option<String>,
        /// Base URL the HTTP tool invoker POSTs `{base_url}/tools/{name}` to.
        #[arg(long, env = "ORKA_TOOL_BASE_URL")]
        tool_base_url: String,
    },
}

pub async fn run(store: Arc<PgStore>, command: WorkerCommand) -> Result<()> {
    let WorkerCommand::Run { worker_id, tool_base_url } = command;
    let worker_id = worker_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let config = WorkerConfig::from_env();
    let graceful_shutdown = Duration::from_secs(config.graceful_shutdown_seconds);

    let invoker = Arc::new(HttpToolInvoker::new(tool_base_url));
    let executor = PipelineExecutor::new(invoker);
    let worker = Arc::new(Worker::new(
        worker_id.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        executor,
        config,
    ));

    let shutdown = CancellationToken::new();
    let run_handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!(worker_id = %worker_id, "shutdown signal received");
    shutdown.cancel();

    if tokio::time::timeout(graceful_shutdown, run_handle).await.is_err() {
        warn!(
            worker_id = %worker_id,
            timeout_seconds = graceful_shutdown.as_secs(),
            "worker did not shut down within the graceful shutdown window"
        );
    }

    Ok(())
}
