//! # orka-template
//!
//! The `${EXPR}` template renderer and condition evaluator described in
//! `spec.md` §4.2. Strings are scanned for `${EXPR}` occurrences; each
//! `EXPR` is a JMESPath expression evaluated against a `Context` rendered as
//! a `Value::Object` (dotted attribute access, bracketed index access, and
//! the JMESPath `length()` built-in all fall out of using a real JMESPath
//! engine rather than a hand-rolled path-query subset).
//!
//! Resolution of the open question in `spec.md` §9: the renderer returns
//! the native `Value` only via *structural* recursion — when a `with`
//! value already is a map or list, its leaves get rendered in place. A
//! string value is always rendered to its string form, including the case
//! where the string is exactly one `${EXPR}` and nothing else. Native
//! values therefore only reach a tool input by the caller putting them in
//! a map/list shape in the pipeline definition, never by string coercion.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use orka_core::Value;

#[derive(Debug, Error, Clone)]
pub enum TemplateError {
    #[error("empty variable expression found: ${{}}")]
    EmptyExpression,

    #[error("invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("failed to evaluate expression '{expression}': {message}")]
    EvaluationFailed { expression: String, message: String },
}

static TEMPLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static template pattern is valid"));

/// Recursively render `${EXPR}` occurrences in `obj` against `ctx`.
///
/// Maps and lists are rewritten structurally (keys are never rendered);
/// strings are rewritten via regex substitution; every other scalar is
/// returned unchanged.
pub fn render(obj: &Value, ctx: &Value) -> Result<Value, TemplateError> {
    match obj {
        Value::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), render(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => Ok(Value::String(render_string(s, ctx)?)),
        other => Ok(other.clone()),
    }
}

fn render_string(template: &str, ctx: &Value) -> Result<String, TemplateError> {
    // `Regex::replace_all` has no fallible closure variant, so collect the
    // first error out-of-band and surface it after the scan completes.
    let mut error: Option<TemplateError> = None;

    let rendered = TEMPLATE_PATTERN.replace_all(template, |caps: &regex::Captures| {
        if error.is_some() {
            return String::new();
        }
        let expr = caps[1].trim();
        if expr.is_empty() {
            error = Some(TemplateError::EmptyExpression);
            return String::new();
        }
        match evaluate(expr, ctx) {
            Ok(value) => value.to_template_string(),
            Err(e) => {
                error = Some(e);
                String::new()
            }
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

/// Evaluate a single JMESPath expression against `ctx`, returning
/// `Value::Null` for any path that doesn't resolve (missing paths are
/// deliberately not errors — `spec.md` §4.2). Syntactically invalid
/// expressions are `TemplateError::InvalidExpression`.
pub fn evaluate(expr: &str, ctx: &Value) -> Result<Value, TemplateError> {
    let compiled = jmespath::compile(expr).map_err(|e| TemplateError::InvalidExpression {
        expression: expr.to_string(),
        message: e.to_string(),
    })?;

    let json_ctx: serde_json::Value = ctx.clone().into();
    let var = jmespath::Variable::try_from(json_ctx).map_err(|e| {
        TemplateError::EvaluationFailed {
            expression: expr.to_string(),
            message: e.to_string(),
        }
    })?;

    let result = compiled
        .search(Arc::new(var))
        .map_err(|e| TemplateError::EvaluationFailed {
            expression: expr.to_string(),
            message: e.to_string(),
        })?;

    Ok(variable_to_value(&result))
}

/// Evaluate `expr` as a boolean guard (`spec.md` §4.2 "Condition
/// evaluation"): null/empty/zero/false coerce to `false`, everything else to
/// `true`.
pub fn evaluate_condition(expr: &str, ctx: &Value) -> Result<bool, TemplateError> {
    Ok(evaluate(expr, ctx)?.is_truthy())
}

fn variable_to_value(var: &jmespath::Variable) -> Value {
    use jmespath::Variable;

    match var {
        Variable::Null => Value::Null,
        Variable::Bool(b) => Value::Bool(*b),
        Variable::Number(n) => {
            if n.is_i64() || n.is_u64() {
                // Preserve integers exactly; only floats go through `from_f64`
                // (spec.md §4.2 "numbers → their natural string form").
                Value::Number(n.clone())
            } else {
                serde_json::Number::from_f64(n.as_f64().unwrap_or_default())
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Variable::String(s) => Value::String(s.clone()),
        Variable::Array(items) => {
            Value::Array(items.iter().map(variable_to_value).collect())
        }
        Variable::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), variable_to_value(v));
            }
            Value::Object(out)
        }
        Variable::Expref(_) => Value::Null,
    }
}

/// Collect every `${EXPR}` expression referenced anywhere in `obj`, sorted
/// and deduplicated. Used by callers that want to validate a pipeline's
/// template coverage before running it.
pub fn extract_expressions(obj: &Value) -> Vec<String> {
    let mut found = std::collections::BTreeSet::new();
    collect_expressions(obj, &mut found);
    found.into_iter().collect()
}

fn collect_expressions(obj: &Value, out: &mut std::collections::BTreeSet<String>) {
    match obj {
        Value::Object(map) => {
            for v in map.values() {
                collect_expressions(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_expressions(item, out);
            }
        }
        Value::String(s) => {
            for caps in TEMPLATE_PATTERN.captures_iter(s) {
                out.insert(caps[1].trim().to_string());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(params: BTreeMap<String, Value>, steps: BTreeMap<String, Value>) -> Value {
        let mut obj = BTreeMap::new();
        obj.insert("params".to_string(), Value::Object(params));
        obj.insert("steps".to_string(), Value::Object(steps));
        Value::Object(obj)
    }

    #[test]
    fn renders_simple_variable_substitution() {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), Value::String("Bob".into()));
        let c = ctx(params, BTreeMap::new());

        let rendered = render(&Value::String("hi ${params.name}".into()), &c).unwrap();
        assert_eq!(rendered, Value::String("hi Bob".into()));
    }

    #[test]
    fn renders_nested_object_access_as_string() {
        let mut v = BTreeMap::new();
        v.insert("v".to_string(), Value::Number(42.into()));
        let mut x = BTreeMap::new();
        x.insert("x".to_string(), Value::Object(v));
        let mut steps = BTreeMap::new();
        steps.insert("s".to_string(), Value::Object(x));
        let c = ctx(BTreeMap::new(), steps);

        let rendered = render(&Value::String("${steps.s.x.v}".into()), &c).unwrap();
        assert_eq!(rendered, Value::String("42".into()));
    }

    #[test]
    fn missing_path_renders_as_null_not_error() {
        let c = Value::Object(BTreeMap::new());
        let rendered = render(&Value::String("${missing.path}".into()), &c).unwrap();
        assert_eq!(rendered, Value::String("null".into()));
    }

    #[test]
    fn malformed_expression_is_template_error() {
        let c = Value::Object(BTreeMap::new());
        let err = render(&Value::String("${bad..expr}".into()), &c).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidExpression { .. }));
    }

    #[test]
    fn structural_maps_and_lists_render_leaves_not_whole_string() {
        let mut params = BTreeMap::new();
        params.insert("n".to_string(), Value::String("Bob".into()));
        let c = ctx(params, BTreeMap::new());

        let mut input = BTreeMap::new();
        input.insert("a".to_string(), Value::String("hi ${params.n}".into()));
        input.insert(
            "b".to_string(),
            Value::Array(vec![Value::String("${params.n}".into())]),
        );

        let rendered = render(&Value::Object(input), &c).unwrap();
        let obj = rendered.as_object().unwrap();
        assert_eq!(obj["a"], Value::String("hi Bob".into()));
        assert_eq!(
            obj["b"],
            Value::Array(vec![Value::String("Bob".into())])
        );
    }

    #[test]
    fn idempotent_on_fully_resolved_output() {
        let c = Value::Object(BTreeMap::new());
        let once = render(&Value::String("plain text".into()), &c).unwrap();
        let twice = render(&once, &c).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn condition_coerces_missing_path_to_false() {
        let c = Value::Object(BTreeMap::new());
        assert!(!evaluate_condition("missing.path", &c).unwrap());
    }
}
