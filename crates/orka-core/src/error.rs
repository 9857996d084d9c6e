//! Core error taxonomy (`spec.md` §7). Storage errors are always transient;
//! callers retry with backoff. Losing a lease race or finding no work is
//! never an error — those are represented as `Ok(None)` / `Ok(false)`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("durable work queue storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("task {0} not found")]
    TaskNotFound(uuid::Uuid),
}

impl QueueError {
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        QueueError::Storage(Box::new(err))
    }
}

/// Marks whether a failure should be retried by the Worker Pool's attempt
/// loop (`spec.md` §7). Implemented by every error type that can surface out
/// of a pipeline attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}
