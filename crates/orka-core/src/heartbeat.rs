//! Per-worker liveness records (`spec.md` §3, §4.4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub processed_count: i64,
    pub pid: i32,
    pub hostname: String,
}

/// Liveness bookkeeping read by reaping (`spec.md` §4.4: a lease held by a
/// worker whose heartbeat has gone stale is eligible for reclaim) and
/// written periodically by each running worker.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn upsert(&self, heartbeat: WorkerHeartbeat) -> Result<(), QueueError>;

    async fn list(&self) -> Result<Vec<WorkerHeartbeat>, QueueError>;

    /// Remove heartbeat rows not updated since `older_than`.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError>;
}
