//! # orka-testing
//!
//! In-memory test doubles for the traits defined in `orka-core`, used across
//! the workspace's test suites instead of standing up Postgres: an
//! [`InMemoryWorkQueue`] honoring the same lease/renew/complete/release/reap
//! contract as `orka-queue-postgres`, an [`InMemoryTaskStore`], an
//! [`InMemoryRunLogStore`] and [`InMemoryHeartbeatStore`], and a handful of
//! canned [`ToolInvoker`] implementations for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use orka_core::{
    ControlPlane, DueWorkRow, HeartbeatStore, NewDueWork, NewRunLog, QueueError, RunLogRow,
    RunLogStore, Task, TaskStore, ToolError, ToolInvoker, Value, WorkerHeartbeat, WorkQueue,
};

/// A `Mutex`-guarded `Vec<DueWorkRow>` implementing [`WorkQueue`] with the
/// same lease-ordering and SKIP LOCKED-equivalent availability semantics as
/// `orka-queue-postgres::PgWorkQueue`.
#[derive(Default)]
pub struct InMemoryWorkQueue {
    rows: Mutex<Vec<DueWorkRow>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn lease_one(
        &self,
        worker_id: &str,
        lease_duration: chrono::Duration,
    ) -> Result<Option<DueWorkRow>, QueueError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;

        let mut candidate_idx: Option<usize> = None;
        for (idx, row) in rows.iter().enumerate() {
            if !row.is_available(now) {
                continue;
            }
            candidate_idx = match candidate_idx {
                None => Some(idx),
                Some(best) => {
                    let b = &rows[best];
                    if (row.run_at, -row.priority, row.id) < (b.run_at, -b.priority, b.id) {
                        Some(idx)
                    } else {
                        Some(best)
                    }
                }
            };
        }

        let Some(idx) = candidate_idx else {
            return Ok(None);
        };

        let row = &mut rows[idx];
        row.locked_until = Some(now + lease_duration);
        row.locked_by = Some(worker_id.to_string());
        Ok(Some(row.clone()))
    }

    async fn renew_lease(
        &self,
        row_id: Uuid,
        worker_id: &str,
        new_duration: chrono::Duration,
    ) -> Result<bool, QueueError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.iter_mut().find(|r| r.id == row_id) else {
            return Ok(false);
        };
        let owned = row.locked_by.as_deref() == Some(worker_id);
        let not_expired = row.locked_until.map(|u| u >= now).unwrap_or(false);
        if owned && not_expired {
            row.locked_until = Some(now + new_duration);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn complete(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let mut rows = self.rows.lock().await;
        rows.retain(|r| !(r.id == row_id && r.locked_by.as_deref() == Some(worker_id)));
        Ok(())
    }

    async fn release(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == row_id && r.locked_by.as_deref() == Some(worker_id))
        {
            row.locked_until = None;
            row.locked_by = None;
        }
        Ok(())
    }

    async fn reap_expired_leases(&self, grace: chrono::Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut reaped = 0u64;
        for row in rows.iter_mut() {
            if let Some(until) = row.locked_until {
                if until + grace < now {
                    row.locked_until = None;
                    row.locked_by = None;
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    async fn insert(&self, new_row: NewDueWork) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let mut rows = self.rows.lock().await;
        rows.push(DueWorkRow {
            id,
            task_id: new_row.task_id,
            run_at: new_row.run_at,
            priority: new_row.priority,
            locked_until: None,
            locked_by: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

/// A `Mutex`-guarded `HashMap<Uuid, Task>` implementing both [`TaskStore`]
/// and [`ControlPlane`]; `run_now` inserts directly into a co-owned
/// [`InMemoryWorkQueue`], mirroring how the real control plane bypasses the
/// Scheduler for manual runs.
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    queue: Arc<InMemoryWorkQueue>,
}

impl InMemoryTaskStore {
    pub fn new(queue: Arc<InMemoryWorkQueue>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            queue,
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, QueueError> {
        Ok(self.tasks.lock().await.get(&task_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Task>, QueueError> {
        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ControlPlane for InMemoryTaskStore {
    async fn register_task(&self, task: Task) -> Result<(), QueueError> {
        self.tasks.lock().await.insert(task.id, task);
        Ok(())
    }

    async fn update_task(&self, task: Task) -> Result<(), QueueError> {
        self.tasks.lock().await.insert(task.id, task);
        Ok(())
    }

    async fn unregister_task(&self, task_id: Uuid) -> Result<(), QueueError> {
        self.tasks.lock().await.remove(&task_id);
        Ok(())
    }

    async fn run_now(&self, task_id: Uuid) -> Result<Uuid, QueueError> {
        let tasks = self.tasks.lock().await;
        let task = tasks.get(&task_id).ok_or(QueueError::TaskNotFound(task_id))?;
        self.queue
            .insert(NewDueWork {
                task_id: task.id,
                run_at: Utc::now(),
                priority: task.priority,
            })
            .await
    }
}

/// A `Mutex`-guarded `Vec<RunLogRow>` implementing [`RunLogStore`].
#[derive(Default)]
pub struct InMemoryRunLogStore {
    rows: Mutex<Vec<RunLogRow>>,
}

impl InMemoryRunLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl RunLogStore for InMemoryRunLogStore {
    async fn insert(&self, entry: NewRunLog) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        self.rows.lock().await.push(RunLogRow {
            id,
            task_id: entry.task_id,
            worker_id: entry.worker_id,
            started_at: entry.started_at,
            finished_at: entry.finished_at,
            success: entry.success,
            attempt: entry.attempt,
            output: entry.output,
            error: entry.error,
        });
        Ok(id)
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RunLogRow>, QueueError> {
        let mut rows: Vec<RunLogRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }
}

/// A `Mutex`-guarded `HashMap<String, WorkerHeartbeat>` implementing
/// [`HeartbeatStore`].
#[derive(Default)]
pub struct InMemoryHeartbeatStore {
    rows: Mutex<HashMap<String, WorkerHeartbeat>>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn upsert(&self, heartbeat: WorkerHeartbeat) -> Result<(), QueueError> {
        self.rows
            .lock()
            .await
            .insert(heartbeat.worker_id.clone(), heartbeat);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn prune(&self, older_than: chrono::DateTime<Utc>) -> Result<u64, QueueError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, hb| hb.last_heartbeat >= older_than);
        Ok((before - rows.len()) as u64)
    }
}

/// Echoes its rendered input back as the step result. Useful for asserting
/// that templates rendered as expected without modeling a real tool.
pub struct EchoToolInvoker;

#[async_trait]
impl ToolInvoker for EchoToolInvoker {
    async fn invoke(&self, _address: &str, input: Value, _timeout: Duration) -> Result<Value, ToolError> {
        Ok(input)
    }
}

/// Fails with a retryable error `fail_times` times, then succeeds — for
/// exercising the worker pool's attempt loop.
pub struct FlakyToolInvoker {
    calls: AtomicUsize,
    fail_times: usize,
}

impl FlakyToolInvoker {
    pub fn new(fail_times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_times,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolInvoker for FlakyToolInvoker {
    async fn invoke(&self, _address: &str, _input: Value, _timeout: Duration) -> Result<Value, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            Err(ToolError::retryable("transient failure"))
        } else {
            Ok(Value::String("ok".into()))
        }
    }
}

/// Always fails non-retryably — for exercising dead-letter / no-retry paths.
pub struct AlwaysFailToolInvoker {
    pub message: String,
}

#[async_trait]
impl ToolInvoker for AlwaysFailToolInvoker {
    async fn invoke(&self, _address: &str, _input: Value, _timeout: Duration) -> Result<Value, ToolError> {
        Err(ToolError::non_retryable(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_one_honors_run_at_then_priority_ordering() {
        let queue = InMemoryWorkQueue::new();
        let now = Utc::now();
        let later = queue
            .insert(NewDueWork {
                task_id: Uuid::new_v4(),
                run_at: now,
                priority: 1,
            })
            .await
            .unwrap();
        let sooner_higher_priority = queue
            .insert(NewDueWork {
                task_id: Uuid::new_v4(),
                run_at: now,
                priority: 10,
            })
            .await
            .unwrap();

        let leased = queue
            .lease_one("w1", chrono::Duration::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.id, sooner_higher_priority);
        assert_ne!(leased.id, later);
    }

    #[tokio::test]
    async fn a_leased_row_is_unavailable_until_released_or_expired() {
        let queue = InMemoryWorkQueue::new();
        queue
            .insert(NewDueWork {
                task_id: Uuid::new_v4(),
                run_at: Utc::now(),
                priority: 0,
            })
            .await
            .unwrap();

        let first = queue
            .lease_one("w1", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = queue
            .lease_one("w2", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(second.is_none());

        queue.release(first.unwrap().id, "w1").await.unwrap();
        let third = queue
            .lease_one("w2", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    /// `spec.md` §8 scenario 3: 100 due rows contended by 10 concurrent
    /// workers must yield exactly 100 successful completions and never let
    /// two workers hold the same row at once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn hundred_rows_ten_workers_no_double_processing() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        for _ in 0..100 {
            queue
                .insert(NewDueWork {
                    task_id: Uuid::new_v4(),
                    run_at: Utc::now(),
                    priority: 0,
                })
                .await
                .unwrap();
        }

        let completed: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));
        let mut workers = Vec::new();
        for i in 0..10 {
            let queue = Arc::clone(&queue);
            let completed = Arc::clone(&completed);
            let worker_id = format!("w{i}");
            workers.push(tokio::spawn(async move {
                loop {
                    let leased = queue
                        .lease_one(&worker_id, chrono::Duration::seconds(30))
                        .await
                        .unwrap();
                    let Some(row) = leased else {
                        break;
                    };
                    queue.complete(row.id, &worker_id).await.unwrap();
                    completed.lock().await.push(row.id);
                }
            }));
        }
        for w in workers {
            w.await.unwrap();
        }

        let completed = completed.lock().await;
        assert_eq!(completed.len(), 100, "every row must be completed exactly once");
        let unique: std::collections::HashSet<_> = completed.iter().collect();
        assert_eq!(unique.len(), 100, "no row was double-processed");
        assert!(queue.is_empty().await);
    }
}
