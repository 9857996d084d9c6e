//! # orka-executor
//!
//! Sequential pipeline step execution (`spec.md` §4.2). A [`PipelineExecutor`]
//! walks a [`PipelineDef`] one step at a time against a shared [`Context`]:
//! evaluate the step's `if` guard, render its `with` templates, invoke the
//! named tool under a timeout, and bind the result under `save_as`. The
//! first step failure aborts the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use orka_core::{Context, PipelineDef, Retryable, Task, ToolError, ToolInvoker};
use orka_template::{evaluate_condition, render, TemplateError};

/// Errors arising from one pipeline run.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("pipeline definition invalid: {0}")]
    InvalidDefinition(String),

    #[error("step '{step_id}' (index {step_index}): template rendering failed: {source}")]
    Template {
        step_id: String,
        step_index: usize,
        #[source]
        source: TemplateError,
    },

    #[error("step '{step_id}' (index {step_index}): condition evaluation failed: {source}")]
    Condition {
        step_id: String,
        step_index: usize,
        #[source]
        source: TemplateError,
    },

    #[error("step '{step_id}' (index {step_index}): tool call failed: {message}")]
    Tool {
        step_id: String,
        step_index: usize,
        message: String,
        retryable: bool,
    },

    #[error("step '{step_id}' (index {step_index}): timed out after {seconds}s")]
    Timeout {
        step_id: String,
        step_index: usize,
        seconds: u64,
    },
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Tool { retryable, .. } => *retryable,
            PipelineError::Timeout { .. } => true,
            PipelineError::Template { .. }
            | PipelineError::Condition { .. }
            | PipelineError::InvalidDefinition(_) => false,
        }
    }
}

/// The default per-step timeout when a step doesn't set `timeout_seconds`
/// (`spec.md` §6).
pub const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 30;

/// Check a pipeline definition for structural problems before running it.
/// Currently this catches duplicate step ids, the one case the original
/// pipeline engine rejected up front rather than discovering mid-run.
pub fn validate_pipeline(pipeline: &PipelineDef) -> Result<(), PipelineError> {
    let mut seen = std::collections::HashSet::new();
    for step in pipeline.iter() {
        if !seen.insert(step.id.as_str()) {
            return Err(PipelineError::InvalidDefinition(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    Ok(())
}

/// Runs a [`PipelineDef`] against a [`ToolInvoker`], producing the final
/// [`Context`] (`spec.md` §4.1, §4.2).
pub struct PipelineExecutor {
    tool_invoker: Arc<dyn ToolInvoker>,
}

impl PipelineExecutor {
    pub fn new(tool_invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { tool_invoker }
    }

    /// Execute `task`'s pipeline to completion or first failure.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn execute(&self, task: &Task) -> Result<Context, PipelineError> {
        validate_pipeline(&task.pipeline)?;

        let started_at = Utc::now();
        let mut ctx = Context::new(started_at.to_rfc3339(), task.params.clone());
        let total_steps = task.pipeline.len();
        let mut executed_steps = 0usize;
        let mut skipped_steps = 0usize;

        for (index, step) in task.pipeline.iter().enumerate() {
            let ctx_value = ctx.as_value();

            if let Some(guard) = &step.if_expr {
                let passes =
                    evaluate_condition(guard, &ctx_value).map_err(|source| PipelineError::Condition {
                        step_id: step.id.clone(),
                        step_index: index,
                        source,
                    })?;
                if !passes {
                    debug!(step_id = %step.id, guard, "step skipped");
                    skipped_steps += 1;
                    continue;
                }
            }

            let rendered_with = render(&orka_core::Value::Object(step.with.clone()), &ctx_value)
                .map_err(|source| PipelineError::Template {
                    step_id: step.id.clone(),
                    step_index: index,
                    source,
                })?;

            let timeout_seconds = step.timeout_seconds.unwrap_or(DEFAULT_STEP_TIMEOUT_SECONDS);
            info!(step_id = %step.id, tool = %step.uses, "executing step");

            let invocation = self
                .tool_invoker
                .invoke(&step.uses, rendered_with, Duration::from_secs(timeout_seconds));

            let outcome = tokio::time::timeout(Duration::from_secs(timeout_seconds), invocation)
                .await
                .map_err(|_| PipelineError::Timeout {
                    step_id: step.id.clone(),
                    step_index: index,
                    seconds: timeout_seconds,
                })?;

            let result = outcome.map_err(|e: ToolError| PipelineError::Tool {
                step_id: step.id.clone(),
                step_index: index,
                message: e.message,
                retryable: e.retryable,
            })?;

            if let Some(save_as) = &step.save_as {
                ctx.steps.insert(save_as.clone(), result);
            }
            executed_steps += 1;
        }

        let elapsed = (Utc::now() - started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();

        ctx.meta.success = true;
        ctx.meta.total_steps = total_steps;
        ctx.meta.executed_steps = executed_steps;
        ctx.meta.skipped_steps = skipped_steps;
        ctx.meta.execution_time_seconds = elapsed;

        info!(
            executed_steps,
            skipped_steps, total_steps, "pipeline execution completed"
        );

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    use orka_core::{PipelineDef, ScheduleKind, Step, Value};

    struct EchoTool;

    #[async_trait]
    impl ToolInvoker for EchoTool {
        async fn invoke(
            &self,
            _address: &str,
            input: Value,
            _timeout: Duration,
        ) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    struct FlakyTool {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl ToolInvoker for FlakyTool {
        async fn invoke(
            &self,
            _address: &str,
            _input: Value,
            _timeout: Duration,
        ) -> Result<Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ToolError::retryable("still warming up"))
            } else {
                Ok(Value::String("ok".into()))
            }
        }
    }

    struct HangingTool;

    #[async_trait]
    impl ToolInvoker for HangingTool {
        async fn invoke(
            &self,
            _address: &str,
            _input: Value,
            _timeout: Duration,
        ) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(Value::Null)
        }
    }

    fn task_with(pipeline: Vec<Step>, params: BTreeMap<String, Value>) -> Task {
        Task {
            id: Uuid::new_v4(),
            active: true,
            priority: 0,
            schedule_kind: ScheduleKind::Manual,
            schedule_expr: String::new(),
            timezone: "UTC".to_string(),
            pipeline: pipeline.into_iter().collect::<PipelineDef>(),
            params,
            max_retries: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn step(id: &str, with: BTreeMap<String, Value>) -> Step {
        Step {
            id: id.to_string(),
            uses: "echo.tool".to_string(),
            with,
            save_as: Some(format!("{id}_result")),
            if_expr: None,
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn executes_all_steps_and_binds_save_as() {
        let mut with = BTreeMap::new();
        with.insert("msg".to_string(), Value::String("${params.name}".into()));
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), Value::String("Ada".into()));

        let task = task_with(vec![step("greet", with)], params);
        let executor = PipelineExecutor::new(Arc::new(EchoTool));

        let ctx = executor.execute(&task).await.unwrap();
        assert!(ctx.meta.success);
        assert_eq!(ctx.meta.executed_steps, 1);
        assert_eq!(ctx.meta.skipped_steps, 0);

        let saved = ctx.steps.get("greet_result").unwrap();
        assert_eq!(saved.as_object().unwrap()["msg"], Value::String("Ada".into()));
    }

    #[tokio::test]
    async fn skips_step_whose_condition_is_false() {
        let mut s = step("maybe", BTreeMap::new());
        s.if_expr = Some("params.run".to_string());
        let task = task_with(vec![s], BTreeMap::new());

        let executor = PipelineExecutor::new(Arc::new(EchoTool));
        let ctx = executor.execute(&task).await.unwrap();
        assert_eq!(ctx.meta.skipped_steps, 1);
        assert_eq!(ctx.meta.executed_steps, 0);
        assert!(!ctx.steps.contains_key("maybe_result"));
    }

    #[tokio::test]
    async fn duplicate_step_ids_are_rejected_before_execution() {
        let task = task_with(
            vec![step("dup", BTreeMap::new()), step("dup", BTreeMap::new())],
            BTreeMap::new(),
        );
        let executor = PipelineExecutor::new(Arc::new(EchoTool));
        let err = executor.execute(&task).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn tool_failure_aborts_the_run() {
        let task = task_with(vec![step("a", BTreeMap::new())], BTreeMap::new());
        let flaky = Arc::new(FlakyTool {
            calls: AtomicUsize::new(0),
            fail_times: 10,
        });
        let executor = PipelineExecutor::new(flaky);
        let err = executor.execute(&task).await.unwrap_err();
        assert!(matches!(err, PipelineError::Tool { retryable: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn step_exceeding_its_timeout_is_reported_as_timeout() {
        let mut s = step("slow", BTreeMap::new());
        s.timeout_seconds = Some(1);
        let task = task_with(vec![s], BTreeMap::new());

        let executor = PipelineExecutor::new(Arc::new(HangingTool));
        let err = executor.execute(&task).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { seconds: 1, .. }));
    }
}
