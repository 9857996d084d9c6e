//! `orka queue status` / `orka queue cleanup`, mirroring `cmd_status` and
//! `cmd_cleanup` in the original system's `workers/cli.py`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use orka_core::{HeartbeatStore, WorkQueue};

use orka_queue_postgres::PgStore;

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Show queue occupancy and active worker heartbeats.
    Status,
    /// Reap expired leases and prune stale worker heartbeats.
    Cleanup {
        /// Heartbeats older than this are considered stale and pruned.
        #[arg(long, default_value_t = 10)]
        stale_minutes: i64,
    },
}

pub async fn run(store: Arc<PgStore>, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::Status => status(&store).await,
        QueueCommand::Cleanup { stale_minutes } => cleanup(&store, stale_minutes).await,
    }
}

async fn status(store: &PgStore) -> Result<()> {
    let stats = store.queue_stats().await.context("failed to load queue stats")?;
    println!("=== Queue Statistics ===");
    println!("  available: {}", stats.available);
    println!("  leased:    {}", stats.leased);

    let heartbeats = store.list().await.context("failed to load worker heartbeats")?;
    println!("\n=== Active Workers ({}) ===", heartbeats.len());
    let now = Utc::now();
    for hb in heartbeats {
        let age = (now - hb.last_heartbeat).num_seconds().max(0);
        println!(
            "  {} (processed: {}, last seen: {}s ago, host: {}, pid: {})",
            hb.worker_id, hb.processed_count, age, hb.hostname, hb.pid
        );
    }

    Ok(())
}

async fn cleanup(store: &PgStore, stale_minutes: i64) -> Result<()> {
    let reaped = store
        .reap_expired_leases(chrono::Duration::zero())
        .await
        .context("failed to reap expired leases")?;
    println!("Reaped {reaped} expired lease(s)");

    let cutoff = Utc::now() - chrono::Duration::minutes(stale_minutes);
    let pruned = store
        .prune(cutoff)
        .await
        .context("failed to prune stale heartbeats")?;
    println!("Pruned {pruned} stale heartbeat(s)");

    Ok(())
}
