//! # orka-worker
//!
//! The Worker Pool (`spec.md` §4.4): each [`Worker`] runs an independent
//! loop — heartbeat, reap, lease, execute via [`orka_executor::PipelineExecutor`],
//! retry with backoff, record the outcome, complete or release the lease —
//! coordinating with its peers only through the [`orka_core::WorkQueue`]'s
//! locking. There is no shared in-process state between workers.

mod config;
mod tool_invoker;
mod worker;

pub use config::{WorkerConfig, POLL_INTERVAL};
pub use tool_invoker::HttpToolInvoker;
pub use worker::{backoff_delay, Worker, WorkerError};
