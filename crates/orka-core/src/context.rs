//! The map threaded through pipeline execution (`spec.md` §4.2, GLOSSARY).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// `{ now, params, steps: map<save_as, Value>, _meta }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub now: String,
    pub params: BTreeMap<String, Value>,
    pub steps: BTreeMap<String, Value>,
    #[serde(rename = "_meta")]
    pub meta: ExecutionMeta,
}

impl Context {
    pub fn new(now: String, params: BTreeMap<String, Value>) -> Self {
        Context {
            now,
            params,
            steps: BTreeMap::new(),
            meta: ExecutionMeta::default(),
        }
    }

    /// Render this context as a single `Value::Object`, the shape the
    /// template renderer and condition evaluator search against.
    pub fn as_value(&self) -> Value {
        let mut obj = BTreeMap::new();
        obj.insert("now".to_string(), Value::String(self.now.clone()));
        obj.insert(
            "params".to_string(),
            Value::Object(self.params.clone().into_iter().collect()),
        );
        obj.insert(
            "steps".to_string(),
            Value::Object(self.steps.clone().into_iter().collect()),
        );
        Value::Object(obj)
    }
}

/// Execution summary fields recorded into `_meta` (`spec.md` §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub success: bool,
    pub total_steps: usize,
    pub executed_steps: usize,
    pub skipped_steps: usize,
    pub failed_step_index: Option<usize>,
    pub error: Option<String>,
    pub execution_time_seconds: f64,
}
