//! The scheduler's standalone run loop: restart catch-up, then alternate
//! between sleeping until the next due occurrence and materializing it,
//! until cancelled (`spec.md` §9 "Coroutine/async shutdown").

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orka_core::{TaskStore, WorkQueue};

use crate::scheduler::{Scheduler, SchedulerError};

/// Runs `scheduler`'s tick loop until `shutdown` is cancelled. Intended to
/// be spawned as its own task alongside the Worker Pool.
pub async fn run<Q, S>(scheduler: Arc<Scheduler<Q, S>>, shutdown: CancellationToken)
where
    Q: WorkQueue + 'static,
    S: TaskStore + 'static,
{
    if let Err(e) = scheduler.restart_catchup().await {
        error!(error = %e, "scheduler restart catch-up failed");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("scheduler tick loop shutting down");
                return;
            }
            _ = scheduler.wait_for_next() => {
                if let Err(e) = tick_once(&scheduler).await {
                    error!(error = %e, "scheduler tick failed");
                }
            }
        }
    }
}

async fn tick_once<Q, S>(scheduler: &Scheduler<Q, S>) -> Result<(), SchedulerError>
where
    Q: WorkQueue,
    S: TaskStore,
{
    let materialized = scheduler.tick(Utc::now()).await?;
    if !materialized.is_empty() {
        info!(count = materialized.len(), "materialized due occurrences");
    }
    Ok(())
}
