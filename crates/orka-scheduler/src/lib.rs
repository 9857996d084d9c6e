//! # orka-scheduler
//!
//! Turns a Task's `(schedule_kind, schedule_expr, timezone)` into a stream
//! of [`DueWorkRow`](orka_core::DueWorkRow)s over time (`spec.md` §4.3). The
//! [`occurrence`] module computes one occurrence at a time, DST-correct; the
//! [`scheduler`] module keeps a priority queue of next occurrences across
//! every active task; [`tick`] runs that queue to completion or shutdown.

pub mod occurrence;
pub mod scheduler;
pub mod tick;

pub use occurrence::{
    next_cron_occurrence, next_rrule_occurrence, once_occurrence, parse_timezone, OccurrenceError,
};
pub use scheduler::{Scheduler, SchedulerError, DEFAULT_BACKLOG_CAP};
