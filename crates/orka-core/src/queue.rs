//! The Durable Work Queue contract (`spec.md` §3, §4.1). `WorkQueue` is the
//! locking primitive the rest of the system is built on; `orka-queue-postgres`
//! and `orka-testing::InMemoryWorkQueue` both implement it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// One scheduled occurrence awaiting execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueWorkRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub priority: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DueWorkRow {
    /// (I1): available iff `run_at` has arrived and there is no lease, or
    /// the lease has expired.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if self.run_at > now {
            return false;
        }
        match self.locked_until {
            None => true,
            Some(until) => until < now,
        }
    }
}

/// Atomic, fair lease acquisition over pending occurrences under contention,
/// with zero double-processing (`spec.md` §4.1).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Atomically selects one available row ordered by
    /// `(run_at ASC, priority DESC, id ASC)`, leases it, and returns it.
    /// Returns `Ok(None)` when no row is available — that is never an error.
    async fn lease_one(
        &self,
        worker_id: &str,
        lease_duration: chrono::Duration,
    ) -> Result<Option<DueWorkRow>, QueueError>;

    /// Extends `locked_until` only if `locked_by == worker_id` and the
    /// current lease has not expired. Returns whether the renewal succeeded.
    async fn renew_lease(
        &self,
        row_id: Uuid,
        worker_id: &str,
        new_duration: chrono::Duration,
    ) -> Result<bool, QueueError>;

    /// Deletes the row iff `locked_by == worker_id`. Idempotent: an absent
    /// row is success, not an error.
    async fn complete(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    /// Clears the lease iff the owner matches, making the row immediately
    /// re-leasable. Used on graceful worker shutdown.
    async fn release(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    /// Clears lease fields on rows whose lease expired more than `grace` ago.
    /// Returns the count reaped. Safe to call concurrently from any worker.
    async fn reap_expired_leases(&self, grace: chrono::Duration) -> Result<u64, QueueError>;

    /// Inserts a new occurrence. Used by the Scheduler and by
    /// `ControlPlane::run_now`.
    async fn insert(&self, row: NewDueWork) -> Result<Uuid, QueueError>;
}

/// Fields required to materialize a new occurrence; `id` and `created_at`
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDueWork {
    pub task_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub priority: i32,
}
