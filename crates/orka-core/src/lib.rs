//! # orka-core
//!
//! Shared domain types and traits for Orka, a durable distributed task
//! orchestrator. Users register Tasks — named units of work with a
//! schedule, a timezone, and a declarative Pipeline — and the system
//! guarantees each scheduled occurrence is executed exactly once by exactly
//! one worker, with retries on transient failure.
//!
//! This crate has no IO of its own. It defines:
//!
//! - [`Value`] — the tagged-variant value tree threaded through templates,
//!   contexts, and tool payloads.
//! - [`Task`] / [`PipelineDef`] / [`Step`] — the control plane's persisted
//!   contract.
//! - [`DueWorkRow`] / [`WorkQueue`] — the Durable Work Queue's row shape and
//!   locking contract.
//! - [`RunLogRow`] — the append-only execution audit trail.
//! - [`WorkerHeartbeat`] — per-worker liveness records.
//! - [`Context`] — the map threaded through pipeline execution.
//! - [`ToolInvoker`] — the opaque interface to external tools.
//! - [`TaskStore`] / [`ControlPlane`] — read/write task access.

mod context;
mod control_plane;
mod error;
mod heartbeat;
mod queue;
mod run_log;
mod task;
mod task_store;
mod tool;
mod value;

pub use context::{Context, ExecutionMeta};
pub use control_plane::ControlPlane;
pub use error::{QueueError, Retryable};
pub use heartbeat::{HeartbeatStore, WorkerHeartbeat};
pub use queue::{DueWorkRow, NewDueWork, WorkQueue};
pub use run_log::{NewRunLog, RunLogRow, RunLogStore};
pub use task::{PipelineDef, ScheduleKind, Step, Task};
pub use task_store::TaskStore;
pub use tool::{ToolError, ToolInvoker};
pub use value::Value;
