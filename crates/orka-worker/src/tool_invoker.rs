//! A [`ToolInvoker`] that reaches real tools over HTTP, for production use
//! by `orka-cli`. Addresses are opaque tool names; each is POSTed to
//! `{base_url}/tools/{address}` as a JSON body and the response body is the
//! step result, matching the `invoke` endpoint shape sketched by the
//! original system's MCP-over-HTTP extension.
//!
//! 4xx responses are treated as non-retryable (the request itself is
//! malformed or the tool rejected its input); 5xx responses, timeouts, and
//! connection failures are retryable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use orka_core::{ToolError, ToolInvoker, Value};

pub struct HttpToolInvoker {
    client: Client,
    base_url: String,
}

impl HttpToolInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, address: &str, input: Value, timeout: Duration) -> Result<Value, ToolError> {
        let url = format!("{}/tools/{}", self.base_url.trim_end_matches('/'), address);
        let body = serde_json::Value::from(input);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::retryable(format!("request to '{address}' failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::retryable(format!(
                "tool '{address}' returned {status}: {text}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::non_retryable(format!(
                "tool '{address}' returned {status}: {text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::non_retryable(format!("tool '{address}' returned invalid json: {e}")))?;
        Ok(Value::from(json))
    }
}
