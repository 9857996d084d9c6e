//! PostgreSQL-backed implementation of Orka's storage contracts.
//!
//! This crate provides the production storage layer consumed by
//! `orka-scheduler` and `orka-worker`: [`PgStore`] implements
//! [`WorkQueue`], [`TaskStore`], [`ControlPlane`], [`RunLogStore`], and
//! [`HeartbeatStore`] against a single PostgreSQL pool.
//!
//! # Features
//!
//! - `FOR UPDATE SKIP LOCKED` lease acquisition (`spec.md` §4.1)
//! - Lease renewal, release, and expiry-based reaping
//! - JSONB storage for `Task::pipeline` / `Task::params` and `RunLogRow::output`
//!
//! # Database Schema
//!
//! See `migrations/0001_init.sql` for the full schema (`spec.md` §6):
//! `task`, `due_work`, `run_log`, `worker_heartbeat`, with the indexes the
//! contract requires — `due_work(run_at, priority DESC, id)`,
//! `run_log(task_id, started_at DESC)`, `worker_heartbeat(last_heartbeat)`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use orka_queue_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/orka").await?;
//! let store = PgStore::new(pool);
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use orka_core::{
    ControlPlane, DueWorkRow, HeartbeatStore, NewDueWork, NewRunLog, PipelineDef, QueueError,
    RunLogRow, RunLogStore, ScheduleKind, Task, TaskStore, Value, WorkQueue, WorkerHeartbeat,
};

/// A PostgreSQL-backed storage layer for the whole Orka core.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool, for migrations or health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Applies this crate's embedded migrations (see `migrations/`), creating
/// `task`/`due_work`/`run_log`/`worker_heartbeat` and their indexes if they
/// don't already exist. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn schedule_kind_to_str(kind: ScheduleKind) -> &'static str {
    match kind {
        ScheduleKind::Once => "once",
        ScheduleKind::Cron => "cron",
        ScheduleKind::Rrule => "rrule",
        ScheduleKind::Manual => "manual",
    }
}

fn schedule_kind_from_str(s: &str) -> Result<ScheduleKind, QueueError> {
    match s {
        "once" => Ok(ScheduleKind::Once),
        "cron" => Ok(ScheduleKind::Cron),
        "rrule" => Ok(ScheduleKind::Rrule),
        "manual" => Ok(ScheduleKind::Manual),
        other => Err(QueueError::storage(InvalidColumn(format!(
            "unrecognized schedule_kind '{other}'"
        )))),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidColumn(String);

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task, QueueError> {
    let schedule_kind = schedule_kind_from_str(row.get::<&str, _>("schedule_kind"))?;
    let pipeline_json: serde_json::Value = row.get("pipeline");
    let pipeline: PipelineDef = serde_json::from_value(pipeline_json)
        .map_err(|e| QueueError::storage(InvalidColumn(format!("malformed pipeline json: {e}"))))?;
    let params_json: serde_json::Value = row.get("params");
    let params: BTreeMap<String, Value> = match params_json {
        serde_json::Value::Object(map) => {
            map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
        }
        _ => BTreeMap::new(),
    };

    Ok(Task {
        id: row.get("id"),
        active: row.get("active"),
        priority: row.get("priority"),
        schedule_kind,
        schedule_expr: row.get("schedule_expr"),
        timezone: row.get("timezone"),
        pipeline,
        params,
        max_retries: row.get("max_retries"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn due_work_from_row(row: &sqlx::postgres::PgRow) -> DueWorkRow {
    DueWorkRow {
        id: row.get("id"),
        task_id: row.get("task_id"),
        run_at: row.get("run_at"),
        priority: row.get("priority"),
        locked_until: row.get("locked_until"),
        locked_by: row.get("locked_by"),
        created_at: row.get("created_at"),
    }
}

fn run_log_from_row(row: &sqlx::postgres::PgRow) -> RunLogRow {
    let output: Option<serde_json::Value> = row.get("output");
    RunLogRow {
        id: row.get("id"),
        task_id: row.get("task_id"),
        worker_id: row.get("worker_id"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        success: row.get("success"),
        attempt: row.get("attempt"),
        output: output.map(Value::from),
        error: row.get("error"),
    }
}

fn heartbeat_from_row(row: &sqlx::postgres::PgRow) -> WorkerHeartbeat {
    WorkerHeartbeat {
        worker_id: row.get("worker_id"),
        last_heartbeat: row.get("last_heartbeat"),
        processed_count: row.get("processed_count"),
        pid: row.get("pid"),
        hostname: row.get("hostname"),
    }
}

#[async_trait]
impl WorkQueue for PgStore {
    /// Atomically selects and leases one available row via a
    /// `FOR UPDATE SKIP LOCKED` CTE followed by an `UPDATE` in the same
    /// statement, so concurrent callers never observe the same row
    /// (`spec.md` §4.1).
    async fn lease_one(
        &self,
        worker_id: &str,
        lease_duration: chrono::Duration,
    ) -> Result<Option<DueWorkRow>, QueueError> {
        let locked_until = Utc::now() + lease_duration;

        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id
                FROM due_work
                WHERE run_at <= NOW()
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY run_at ASC, priority DESC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE due_work
            SET locked_until = $1,
                locked_by = $2
            WHERE id IN (SELECT id FROM candidate)
            RETURNING id, task_id, run_at, priority, locked_until, locked_by, created_at
            "#,
        )
        .bind(locked_until)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        Ok(row.as_ref().map(due_work_from_row))
    }

    async fn renew_lease(
        &self,
        row_id: Uuid,
        worker_id: &str,
        new_duration: chrono::Duration,
    ) -> Result<bool, QueueError> {
        let new_locked_until = Utc::now() + new_duration;
        let result = sqlx::query(
            r#"
            UPDATE due_work
            SET locked_until = $1
            WHERE id = $2 AND locked_by = $3 AND locked_until >= NOW()
            "#,
        )
        .bind(new_locked_until)
        .bind(row_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM due_work WHERE id = $1 AND locked_by = $2")
            .bind(row_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn release(&self, row_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE due_work
            SET locked_until = NULL, locked_by = NULL
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(row_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn reap_expired_leases(&self, grace: chrono::Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - grace;
        let result = sqlx::query(
            r#"
            UPDATE due_work
            SET locked_until = NULL, locked_by = NULL
            WHERE locked_until IS NOT NULL AND locked_until < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        let reaped = result.rows_affected();
        if reaped > 0 {
            warn!(reaped, "reaped expired leases");
        }
        Ok(reaped)
    }

    async fn insert(&self, row: NewDueWork) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO due_work (id, task_id, run_at, priority, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(id)
        .bind(row.task_id)
        .bind(row.run_at)
        .bind(row.priority)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        Ok(id)
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, QueueError> {
        let row = sqlx::query("SELECT * FROM task WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Task>, QueueError> {
        let rows = sqlx::query("SELECT * FROM task WHERE active = TRUE")
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        rows.iter().map(task_from_row).collect()
    }
}

#[async_trait]
impl ControlPlane for PgStore {
    /// Inserts or replaces a task's scheduling state (`spec.md` §4.3
    /// "Idempotence": re-registering a task replaces it).
    async fn register_task(&self, task: Task) -> Result<(), QueueError> {
        self.upsert_task(&task).await
    }

    async fn update_task(&self, task: Task) -> Result<(), QueueError> {
        self.upsert_task(&task).await
    }

    async fn unregister_task(&self, task_id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM task WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn run_now(&self, task_id: Uuid) -> Result<Uuid, QueueError> {
        let priority: Option<i32> = sqlx::query("SELECT priority FROM task WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::storage)?
            .map(|r| r.get("priority"));

        let Some(priority) = priority else {
            return Err(QueueError::TaskNotFound(task_id));
        };

        self.insert(NewDueWork {
            task_id,
            run_at: Utc::now(),
            priority,
        })
        .await
    }
}

impl PgStore {
    async fn upsert_task(&self, task: &Task) -> Result<(), QueueError> {
        let pipeline_json = serde_json::to_value(&task.pipeline)
            .map_err(|e| QueueError::storage(InvalidColumn(format!("pipeline serialize: {e}"))))?;
        let params_json = serde_json::to_value(
            task.params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                .collect::<serde_json::Map<_, _>>(),
        )
        .map_err(|e| QueueError::storage(InvalidColumn(format!("params serialize: {e}"))))?;

        sqlx::query(
            r#"
            INSERT INTO task (
                id, active, priority, schedule_kind, schedule_expr, timezone,
                pipeline, params, max_retries, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                active = EXCLUDED.active,
                priority = EXCLUDED.priority,
                schedule_kind = EXCLUDED.schedule_kind,
                schedule_expr = EXCLUDED.schedule_expr,
                timezone = EXCLUDED.timezone,
                pipeline = EXCLUDED.pipeline,
                params = EXCLUDED.params,
                max_retries = EXCLUDED.max_retries,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(task.id)
        .bind(task.active)
        .bind(task.priority)
        .bind(schedule_kind_to_str(task.schedule_kind))
        .bind(&task.schedule_expr)
        .bind(&task.timezone)
        .bind(pipeline_json)
        .bind(params_json)
        .bind(task.max_retries)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl RunLogStore for PgStore {
    async fn insert(&self, entry: NewRunLog) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let output_json = entry.output.map(serde_json::Value::from);
        sqlx::query(
            r#"
            INSERT INTO run_log (
                id, task_id, worker_id, started_at, finished_at, success,
                attempt, output, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(entry.task_id)
        .bind(&entry.worker_id)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.success)
        .bind(entry.attempt)
        .bind(output_json)
        .bind(&entry.error)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        Ok(id)
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RunLogRow>, QueueError> {
        let rows = sqlx::query("SELECT * FROM run_log WHERE task_id = $1 ORDER BY started_at DESC")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(rows.iter().map(run_log_from_row).collect())
    }
}

#[async_trait]
impl HeartbeatStore for PgStore {
    async fn upsert(&self, heartbeat: WorkerHeartbeat) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO worker_heartbeat (worker_id, last_heartbeat, processed_count, pid, hostname)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (worker_id) DO UPDATE SET
                last_heartbeat = EXCLUDED.last_heartbeat,
                processed_count = EXCLUDED.processed_count,
                pid = EXCLUDED.pid,
                hostname = EXCLUDED.hostname
            "#,
        )
        .bind(&heartbeat.worker_id)
        .bind(heartbeat.last_heartbeat)
        .bind(heartbeat.processed_count)
        .bind(heartbeat.pid)
        .bind(&heartbeat.hostname)
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        let rows = sqlx::query("SELECT * FROM worker_heartbeat")
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(rows.iter().map(heartbeat_from_row).collect())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM worker_heartbeat WHERE last_heartbeat < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(result.rows_affected())
    }
}

/// Utility functions for queue maintenance, mirroring the periodic
/// maintenance cycle in the worker pool's main loop (`spec.md` §4.4).
impl PgStore {
    /// Total rows currently in `due_work`, broken down by availability.
    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE locked_by IS NULL OR locked_until < NOW()) AS available,
                COUNT(*) FILTER (WHERE locked_by IS NOT NULL AND locked_until >= NOW()) AS leased
            FROM due_work
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        Ok(QueueStats {
            available: row.get("available"),
            leased: row.get("leased"),
        })
    }
}

/// Snapshot of durable work queue occupancy.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub available: i64,
    pub leased: i64,
}
