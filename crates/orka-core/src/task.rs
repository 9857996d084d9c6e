//! Task and pipeline definitions — the control plane's persisted contract
//! that the Scheduler and Pipeline Executor read (`spec.md` §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// How a Task's occurrences are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Cron,
    Rrule,
    Manual,
}

/// A user-defined recurring (or one-shot) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub active: bool,
    /// Higher wins tie-breaks at lease time; default 5.
    pub priority: i32,
    pub schedule_kind: ScheduleKind,
    /// ISO-8601 instant / cron expression / RFC 5545 RRULE / ignored for `manual`.
    pub schedule_expr: String,
    /// IANA timezone name; scheduling occurs in this zone, DST-correct.
    pub timezone: String,
    pub pipeline: PipelineDef,
    pub params: BTreeMap<String, Value>,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Total attempts allowed for one occurrence: `max_retries + 1`.
    pub fn max_attempts(&self) -> i32 {
        self.max_retries + 1
    }
}

/// An ordered sequence of Steps, wire-compatible with the JSON pipeline
/// definition format in `spec.md` §6: a bare JSON array of step objects.
/// Additional unrecognized fields on a step are ignored at the
/// deserialization layer via `serde`'s default "ignore unknown fields"
/// behavior (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineDef {
    pub steps: Vec<Step>,
}

impl std::ops::Deref for PipelineDef {
    type Target = [Step];

    fn deref(&self) -> &Self::Target {
        &self.steps
    }
}

impl FromIterator<Step> for PipelineDef {
    fn from_iter<T: IntoIterator<Item = Step>>(iter: T) -> Self {
        PipelineDef {
            steps: iter.into_iter().collect(),
        }
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the pipeline.
    pub id: String,
    /// Opaque tool address, meaningless to the core.
    pub uses: String,
    /// Inputs, possibly containing `${EXPR}` template expressions.
    #[serde(default)]
    pub with: BTreeMap<String, Value>,
    /// Binds the step result into the step context under this key; absent
    /// discards the result.
    #[serde(default, rename = "save_as")]
    pub save_as: Option<String>,
    /// Boolean guard; step is skipped (not executed, `save_as` not bound)
    /// when this evaluates falsey.
    #[serde(default, rename = "if")]
    pub if_expr: Option<String>,
    /// Per-step timeout override; falls back to the executor's default.
    #[serde(default, rename = "timeout_seconds")]
    pub timeout_seconds: Option<u64>,
}
