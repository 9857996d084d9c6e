//! The append-only audit trail of execution attempts (`spec.md` §3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub attempt: i32,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Fields supplied when writing a new run log entry; `id` is assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewRunLog {
    pub task_id: Uuid,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub attempt: i32,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Append-only write access to the execution audit trail, and read access
/// for the ordering checks in `spec.md` §5 ("For a single DueWorkRow,
/// RunLogRows are strictly ordered by `attempt` ascending").
#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn insert(&self, entry: NewRunLog) -> Result<Uuid, QueueError>;

    /// All run log rows for `task_id`, most recent first.
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RunLogRow>, QueueError>;
}
