//! The Scheduler: a priority-queue of next occurrences, one entry per active
//! Task, materialized into [`DueWorkRow`]s as their time arrives
//! (`spec.md` §4.3).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use orka_core::{NewDueWork, QueueError, ScheduleKind, Task, TaskStore, WorkQueue};

use crate::occurrence::{
    next_cron_occurrence, next_rrule_occurrence, once_occurrence, parse_timezone, OccurrenceError,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Occurrence(#[from] OccurrenceError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Default cap on missed occurrences materialized per task during restart
/// catch-up (`spec.md` §4.3); overridable via `SCHEDULER_BACKLOG_CAP`.
pub const DEFAULT_BACKLOG_CAP: u32 = 10;

/// A priority queue of `(next_run_at, task_id)`, backed by the `TaskStore`
/// for task definitions and the `WorkQueue` for materialization. Entries are
/// lazily invalidated: `current` holds the authoritative next-run time per
/// task, and a heap entry is only acted on if it still matches.
pub struct Scheduler<Q, S> {
    queue: Arc<Q>,
    task_store: Arc<S>,
    backlog_cap: u32,
    heap: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>>,
    current: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    wake: Notify,
}

impl<Q, S> Scheduler<Q, S>
where
    Q: WorkQueue,
    S: TaskStore,
{
    pub fn new(queue: Arc<Q>, task_store: Arc<S>, backlog_cap: u32) -> Self {
        Self {
            queue,
            task_store,
            backlog_cap,
            heap: Mutex::new(BinaryHeap::new()),
            current: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        }
    }

    /// Next occurrence of `task` strictly after `after`, or `None` if the
    /// schedule is exhausted (`once`, consumed) or never auto-fires
    /// (`manual`).
    fn next_occurrence(
        &self,
        task: &Task,
        tz: Tz,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match task.schedule_kind {
            ScheduleKind::Once => {
                let occ = once_occurrence(&task.schedule_expr)?;
                Ok(if occ > after { Some(occ) } else { None })
            }
            ScheduleKind::Cron => Ok(next_cron_occurrence(&task.schedule_expr, tz, after)?),
            ScheduleKind::Rrule => Ok(next_rrule_occurrence(
                &task.schedule_expr,
                tz,
                task.created_at,
                after,
            )?),
            ScheduleKind::Manual => Ok(None),
        }
    }

    async fn schedule_next(&self, task_id: Uuid, when: DateTime<Utc>) {
        self.current.lock().await.insert(task_id, when);
        self.heap.lock().await.push(Reverse((when, task_id)));
        self.wake.notify_one();
    }

    /// Register a newly active task: compute its first future occurrence
    /// and enqueue it. `manual` and exhausted `once` tasks are no-ops.
    pub async fn register(&self, task: &Task) -> Result<(), SchedulerError> {
        let tz = parse_timezone(&task.timezone)?;
        if let Some(next) = self.next_occurrence(task, tz, Utc::now())? {
            self.schedule_next(task.id, next).await;
        }
        Ok(())
    }

    /// Drop any pending entry for `task_id`. Idempotent.
    pub async fn unregister(&self, task_id: Uuid) {
        self.current.lock().await.remove(&task_id);
    }

    /// Recompute and re-enqueue `task`'s next occurrence, superseding
    /// whatever was previously registered.
    pub async fn update(&self, task: &Task) -> Result<(), SchedulerError> {
        self.unregister(task.id).await;
        self.register(task).await
    }

    /// Process every heap entry due at or before `now`: materialize a
    /// `DueWorkRow` and, for recurring schedules, enqueue the task's next
    /// occurrence. Returns the ids of tasks materialized this tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError> {
        let mut materialized = Vec::new();

        loop {
            let due = {
                let mut heap = self.heap.lock().await;
                match heap.peek() {
                    Some(Reverse((when, _))) if *when <= now => heap.pop(),
                    _ => None,
                }
            };
            let Some(Reverse((when, task_id))) = due else {
                break;
            };

            let is_current = self.current.lock().await.get(&task_id).copied() == Some(when);
            if !is_current {
                continue;
            }

            let Some(task) = self.task_store.get(task_id).await? else {
                self.current.lock().await.remove(&task_id);
                continue;
            };
            if !task.active {
                self.current.lock().await.remove(&task_id);
                continue;
            }

            self.queue
                .insert(NewDueWork {
                    task_id,
                    run_at: when,
                    priority: task.priority,
                })
                .await?;
            materialized.push(task_id);

            let tz = parse_timezone(&task.timezone)?;
            match self.next_occurrence(&task, tz, when)? {
                Some(next) => self.schedule_next(task_id, next).await,
                None => {
                    self.current.lock().await.remove(&task_id);
                }
            }
        }

        Ok(materialized)
    }

    /// The instant the next entry in the heap comes due, if any.
    pub async fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().await.peek().map(|Reverse((when, _))| *when)
    }

    /// On startup: for every active task, materialize missed past
    /// occurrences (one `DueWorkRow` per miss, `run_at = now`) up to
    /// `backlog_cap`, dropping and logging the rest, then register the
    /// task's next future occurrence (`spec.md` §4.3 "Liveness").
    pub async fn restart_catchup(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for task in self.task_store.list_active().await? {
            if task.schedule_kind == ScheduleKind::Manual {
                continue;
            }
            let tz = parse_timezone(&task.timezone)?;
            let mut anchor = task.created_at;
            let mut missed = 0u32;
            let mut dropped = 0u32;

            loop {
                let Some(next) = self.next_occurrence(&task, tz, anchor)? else {
                    break;
                };
                if next > now {
                    self.schedule_next(task.id, next).await;
                    break;
                }
                if missed < self.backlog_cap {
                    self.queue
                        .insert(NewDueWork {
                            task_id: task.id,
                            run_at: now,
                            priority: task.priority,
                        })
                        .await?;
                    missed += 1;
                } else {
                    dropped += 1;
                }
                anchor = next;
            }

            if missed > 0 {
                info!(task_id = %task.id, missed, "caught up missed occurrences on restart");
            }
            if dropped > 0 {
                warn!(
                    task_id = %task.id,
                    dropped,
                    cap = self.backlog_cap,
                    "backlog cap exceeded, dropping missed occurrences"
                );
            }
        }
        Ok(())
    }

    /// Blocks until the next heap entry is due, or `register`/`update`
    /// enqueues something due sooner. Used by the tick loop to avoid
    /// busy-polling.
    pub async fn wait_for_next(&self) {
        loop {
            let sleep_until = self.next_wakeup().await;
            match sleep_until {
                None => {
                    self.wake.notified().await;
                    return;
                }
                Some(when) => {
                    let now = Utc::now();
                    if when <= now {
                        return;
                    }
                    let duration = (when - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => return,
                        _ = self.wake.notified() => {
                            // A nearer occurrence may have been registered; loop to re-check.
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use orka_core::{ControlPlane, PipelineDef};
    use orka_testing::{InMemoryTaskStore, InMemoryWorkQueue};

    fn manual_task_with(
        id: Uuid,
        schedule_kind: ScheduleKind,
        schedule_expr: &str,
        created_at: DateTime<Utc>,
    ) -> Task {
        Task {
            id,
            active: true,
            priority: 0,
            schedule_kind,
            schedule_expr: schedule_expr.to_string(),
            timezone: "UTC".to_string(),
            pipeline: PipelineDef::default(),
            params: BTreeMap::new(),
            max_retries: 0,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn register_then_tick_materializes_a_due_work_row() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let store = Arc::new(InMemoryTaskStore::new(queue.clone()));
        let scheduler = Scheduler::new(queue.clone(), store.clone(), DEFAULT_BACKLOG_CAP);

        let task_id = Uuid::new_v4();
        let now = Utc::now();
        let task = manual_task_with(
            task_id,
            ScheduleKind::Once,
            &(now + chrono::Duration::milliseconds(10)).to_rfc3339(),
            now,
        );
        store.register_task(task.clone()).await.unwrap();
        scheduler.register(&task).await.unwrap();

        let future_now = now + chrono::Duration::milliseconds(20);
        let materialized = scheduler.tick(future_now).await.unwrap();
        assert_eq!(materialized, vec![task_id]);
        assert_eq!(queue.len().await, 1);

        // `once` is exhausted: a second tick at a later time does nothing.
        let again = scheduler.tick(future_now + chrono::Duration::seconds(1)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn unregister_drops_a_pending_entry() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let store = Arc::new(InMemoryTaskStore::new(queue.clone()));
        let scheduler = Scheduler::new(queue.clone(), store.clone(), DEFAULT_BACKLOG_CAP);

        let task_id = Uuid::new_v4();
        let now = Utc::now();
        let task = manual_task_with(
            task_id,
            ScheduleKind::Once,
            &(now + chrono::Duration::milliseconds(10)).to_rfc3339(),
            now,
        );
        store.register_task(task.clone()).await.unwrap();
        scheduler.register(&task).await.unwrap();
        scheduler.unregister(task_id).await;

        let materialized = scheduler
            .tick(now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(materialized.is_empty());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn restart_catchup_materializes_missed_occurrences_up_to_cap() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let store = Arc::new(InMemoryTaskStore::new(queue.clone()));
        // Cap at 2 missed occurrences.
        let scheduler = Scheduler::new(queue.clone(), store.clone(), 2);

        let task_id = Uuid::new_v4();
        // A task created far enough in the past that a "once a minute" cron
        // would have missed several occurrences by "now".
        let created = Utc::now() - chrono::Duration::minutes(10);
        let task = manual_task_with(task_id, ScheduleKind::Cron, "* * * * *", created);
        store.register_task(task).await.unwrap();

        scheduler.restart_catchup().await.unwrap();

        // At most `backlog_cap` catch-up rows, regardless of how many
        // minutes were actually missed.
        assert_eq!(queue.len().await, 2);
    }
}
