//! The opaque interface by which the Pipeline Executor reaches external
//! tools (`spec.md` §6). The core neither knows nor cares about transport;
//! the invoker owns its own schema validation, if any.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::Retryable;
use crate::value::Value;

#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ToolError {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        ToolError {
            message: message.into(),
            retryable: false,
        }
    }
}

impl Retryable for ToolError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// `invoke(address, input, timeout) -> (output, error?)` from `spec.md` §6.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        address: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError>;
}
