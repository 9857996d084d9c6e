//! The per-worker main loop (`spec.md` §4.4): heartbeat, reap, lease,
//! execute, retry, record, complete — repeated until shutdown.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use orka_core::{
    DueWorkRow, HeartbeatStore, NewRunLog, QueueError, Retryable, RunLogStore, Task, TaskStore,
    WorkQueue, WorkerHeartbeat,
};
use orka_executor::PipelineExecutor;

use crate::config::{WorkerConfig, POLL_INTERVAL};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Computes `delay(k) = min(baseDelay · 2^(k-1), maxDelay)`, optionally
/// scaled by multiplicative jitter in `[0.5, 1.0]` (`spec.md` §4.4).
pub fn backoff_delay(attempt: i32, config: &WorkerConfig) -> StdDuration {
    let exp = config.backoff_base_seconds * 2f64.powi(attempt - 1);
    let capped = exp.min(config.backoff_max_seconds);
    let scaled = if config.backoff_jitter {
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        capped * jitter
    } else {
        capped
    };
    StdDuration::from_secs_f64(scaled.max(0.0))
}

/// One worker: a unique id, a lease on the shared storage traits, and a
/// pipeline executor. Workers coordinate only through the `WorkQueue`'s
/// locking — there is no shared in-process state between workers
/// (`spec.md` §5).
pub struct Worker<Q, S, R, H> {
    id: String,
    queue: Arc<Q>,
    tasks: Arc<S>,
    run_logs: Arc<R>,
    heartbeats: Arc<H>,
    executor: PipelineExecutor,
    config: WorkerConfig,
    processed_count: AtomicI64,
}

impl<Q, S, R, H> Worker<Q, S, R, H>
where
    Q: WorkQueue,
    S: TaskStore,
    R: RunLogStore,
    H: HeartbeatStore,
{
    pub fn new(
        id: String,
        queue: Arc<Q>,
        tasks: Arc<S>,
        run_logs: Arc<R>,
        heartbeats: Arc<H>,
        executor: PipelineExecutor,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            queue,
            tasks,
            run_logs,
            heartbeats,
            executor,
            config,
            processed_count: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs until `shutdown` is cancelled. On return, the worker holds no
    /// lease and has emitted a final heartbeat (`spec.md` §4.4 "Shutdown").
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "worker starting");

        let mut last_heartbeat = Instant::now() - heartbeat_period(&self.config);
        let mut last_cleanup = Instant::now() - cleanup_period(&self.config);
        self.heartbeat().await;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let now = Instant::now();
            if now.duration_since(last_heartbeat) >= heartbeat_period(&self.config) {
                self.heartbeat().await;
                last_heartbeat = now;
            }
            if now.duration_since(last_cleanup) >= cleanup_period(&self.config) {
                self.reap().await;
                last_cleanup = now;
            }

            let leased = match self.queue.lease_one(&self.id, self.config.lease_duration()).await {
                Ok(row) => row,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "lease_one failed, pausing");
                    Self::cancellation_aware_sleep(StdDuration::from_secs(1), &shutdown).await;
                    continue;
                }
            };

            let Some(row) = leased else {
                Self::cancellation_aware_sleep(POLL_INTERVAL, &shutdown).await;
                continue;
            };

            self.process(row, &shutdown).await;
        }

        self.heartbeat().await;
        info!(worker_id = %self.id, "worker stopped");
    }

    #[instrument(skip(self, row, shutdown), fields(worker_id = %self.id, row_id = %row.id))]
    async fn process(&self, row: DueWorkRow, shutdown: &CancellationToken) {
        let task = match self.tasks.get(row.task_id).await {
            Ok(Some(task)) if task.active => task,
            Ok(_) => {
                info!("task missing or inactive, dropping occurrence");
                let _ = self.queue.complete(row.id, &self.id).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to load task, releasing row");
                let _ = self.queue.release(row.id, &self.id).await;
                return;
            }
        };

        self.run_attempts(&task, &row, shutdown).await;
    }

    async fn run_attempts(&self, task: &Task, row: &DueWorkRow, shutdown: &CancellationToken) {
        let max_attempts = task.max_attempts();

        for attempt in 1..=max_attempts {
            if shutdown.is_cancelled() {
                info!("shutdown requested, releasing lease before next attempt");
                let _ = self.queue.release(row.id, &self.id).await;
                return;
            }

            if attempt > 1 {
                match self
                    .queue
                    .renew_lease(row.id, &self.id, self.config.lease_duration())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(attempt, "lease lost, abandoning in-flight attempt");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "renew_lease failed, abandoning attempt");
                        return;
                    }
                }
            }

            let started_at = Utc::now();
            let outcome = self.executor.execute(task).await;
            let finished_at = Utc::now();

            match outcome {
                Ok(ctx) => {
                    self.write_run_log(task.id, started_at, finished_at, true, attempt, Some(ctx.as_value()), None)
                        .await;
                    self.processed_count.fetch_add(1, Ordering::Relaxed);
                    let _ = self.queue.complete(row.id, &self.id).await;
                    info!(attempt, "task succeeded");
                    return;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    self.write_run_log(task.id, started_at, finished_at, false, attempt, None, Some(e.to_string()))
                        .await;

                    if !retryable || attempt >= max_attempts {
                        let _ = self.queue.complete(row.id, &self.id).await;
                        warn!(attempt, retryable, "task failed permanently");
                        return;
                    }

                    let delay = backoff_delay(attempt, &self.config);
                    info!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                    if Self::cancellation_aware_sleep(delay, shutdown).await {
                        let _ = self.queue.release(row.id, &self.id).await;
                        return;
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_run_log(
        &self,
        task_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        finished_at: chrono::DateTime<Utc>,
        success: bool,
        attempt: i32,
        output: Option<orka_core::Value>,
        error: Option<String>,
    ) {
        let entry = NewRunLog {
            task_id,
            worker_id: self.id.clone(),
            started_at,
            finished_at,
            success,
            attempt,
            output,
            error,
        };
        if let Err(e) = self.run_logs.insert(entry).await {
            error!(error = %e, "failed to write run log");
        }
    }

    async fn heartbeat(&self) {
        let heartbeat = WorkerHeartbeat {
            worker_id: self.id.clone(),
            last_heartbeat: Utc::now(),
            processed_count: self.processed_count.load(Ordering::Relaxed),
            pid: std::process::id() as i32,
            hostname: hostname(),
        };
        if let Err(e) = self.heartbeats.upsert(heartbeat).await {
            warn!(error = %e, "failed to upsert heartbeat");
        }
    }

    async fn reap(&self) {
        match self.queue.reap_expired_leases(chrono::Duration::zero()).await {
            Ok(0) => {}
            Ok(n) => info!(reaped = n, "reaped expired leases"),
            Err(e) => warn!(error = %e, "failed to reap expired leases"),
        }
    }

    /// Sleeps for `duration` unless `shutdown` fires first. Returns `true`
    /// if shutdown interrupted the sleep.
    async fn cancellation_aware_sleep(duration: StdDuration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.cancelled() => true,
        }
    }
}

fn heartbeat_period(config: &WorkerConfig) -> StdDuration {
    StdDuration::from_secs(config.heartbeat_interval_seconds)
}

fn cleanup_period(config: &WorkerConfig) -> StdDuration {
    StdDuration::from_secs(config.cleanup_interval_seconds)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use orka_core::{ControlPlane, NewDueWork, ScheduleKind, Step, Value};
    use orka_testing::{
        EchoToolInvoker, FlakyToolInvoker, InMemoryHeartbeatStore, InMemoryRunLogStore,
        InMemoryTaskStore, InMemoryWorkQueue,
    };

    fn echo_task(max_retries: i32) -> Task {
        let mut with = BTreeMap::new();
        with.insert("msg".to_string(), Value::String("hi".to_string()));
        let step = Step {
            id: "s".to_string(),
            uses: "echo".to_string(),
            with,
            save_as: Some("r".to_string()),
            if_expr: None,
            timeout_seconds: None,
        };
        Task {
            id: Uuid::new_v4(),
            active: true,
            priority: 5,
            schedule_kind: ScheduleKind::Once,
            schedule_expr: "2030-01-01T10:00:00Z".to_string(),
            timezone: "UTC".to_string(),
            pipeline: vec![step].into_iter().collect(),
            params: BTreeMap::new(),
            max_retries,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn setup(
        task: &Task,
    ) -> (
        Arc<InMemoryWorkQueue>,
        Arc<InMemoryTaskStore>,
        Arc<InMemoryRunLogStore>,
        Arc<InMemoryHeartbeatStore>,
    ) {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let tasks = Arc::new(InMemoryTaskStore::new(queue.clone()));
        let run_logs = Arc::new(InMemoryRunLogStore::new());
        let heartbeats = Arc::new(InMemoryHeartbeatStore::new());

        tasks.register_task(task.clone()).await.unwrap();
        queue
            .insert(NewDueWork {
                task_id: task.id,
                run_at: Utc::now(),
                priority: task.priority,
            })
            .await
            .unwrap();

        (queue, tasks, run_logs, heartbeats)
    }

    #[tokio::test]
    async fn once_success_writes_one_successful_run_log_and_completes_the_row() {
        let task = echo_task(0);
        let (queue, tasks, run_logs, heartbeats) = setup(&task).await;

        let worker = Worker::new(
            "w1".to_string(),
            queue.clone(),
            tasks,
            run_logs.clone(),
            heartbeats,
            PipelineExecutor::new(Arc::new(EchoToolInvoker)),
            WorkerConfig::default(),
        );

        let row = queue
            .lease_one(worker.id(), chrono::Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        worker.process(row, &CancellationToken::new()).await;

        assert_eq!(run_logs.len().await, 1);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_writing_a_run_log_per_attempt() {
        let task = echo_task(3);
        let (queue, tasks, run_logs, heartbeats) = setup(&task).await;

        let flaky = Arc::new(FlakyToolInvoker::new(2));
        let worker = Worker::new(
            "w1".to_string(),
            queue.clone(),
            tasks,
            run_logs.clone(),
            heartbeats,
            PipelineExecutor::new(flaky.clone()),
            WorkerConfig::default(),
        );

        let row = queue
            .lease_one(worker.id(), chrono::Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        worker.process(row, &CancellationToken::new()).await;

        assert_eq!(flaky.call_count(), 3);
        assert_eq!(queue.len().await, 0);
        let logs = run_logs.list_for_task(task.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.iter().filter(|r| r.success).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_crashed_worker_s_lease_is_reclaimed_and_finished_by_another() {
        let task = echo_task(0);
        let queue = Arc::new(InMemoryWorkQueue::new());
        let tasks = Arc::new(InMemoryTaskStore::new(queue.clone()));
        tasks.register_task(task.clone()).await.unwrap();
        queue
            .insert(NewDueWork {
                task_id: task.id,
                run_at: Utc::now(),
                priority: task.priority,
            })
            .await
            .unwrap();

        // Worker A leases with a 2s lease, then "crashes" (never completes
        // or releases).
        let leased_by_a = queue
            .lease_one("worker-a", chrono::Duration::seconds(2))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(StdDuration::from_secs(3)).await;

        // Worker B's lease_one treats the expired lease as available.
        let leased_by_b = queue
            .lease_one("worker-b", chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert!(leased_by_b.is_some());
        assert_eq!(leased_by_b.unwrap().id, leased_by_a.id);
    }
}
