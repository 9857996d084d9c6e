//! Read-side access to Tasks. Tasks are owned by the control plane; the
//! core only reads them by id (`spec.md` §3 "Ownership").

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;
use crate::task::Task;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, QueueError>;

    /// All tasks with `active = true`, used by the Scheduler on startup and
    /// on restart catch-up.
    async fn list_active(&self) -> Result<Vec<Task>, QueueError>;
}
