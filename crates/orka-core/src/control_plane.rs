//! The interface the core exposes to the (external) HTTP control plane
//! (`spec.md` §6). Only `run_now` has core-side behavior worth noting: it
//! inserts a `DueWorkRow` with `run_at = now`, bypassing the Scheduler
//! entirely — it is the one way a `manual` task ever executes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;
use crate::task::Task;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn register_task(&self, task: Task) -> Result<(), QueueError>;
    async fn update_task(&self, task: Task) -> Result<(), QueueError>;
    async fn unregister_task(&self, task_id: Uuid) -> Result<(), QueueError>;
    async fn run_now(&self, task_id: Uuid) -> Result<Uuid, QueueError>;
}
