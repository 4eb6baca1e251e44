//! JEXL expression evaluator for trigger `condition` / `filter` /
//! `validatePayload` clauses and `DynamicValue::Expression` fields.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//!
//! **Security note:** payloads are always passed as context objects, never
//! interpolated into expression strings.

use serde_json::{json, Value};
use trigger_types::{DynamicValue, TriggerContext};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression did not evaluate to a boolean: got {result}")]
    NotBoolean { result: Value },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// TriggerEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for:
/// - `CronConfig::condition` (e.g. `trigger.metadata.scheduled != null`)
/// - `WebhookConfig::validate_payload` (e.g. `event.amount|length > 0`)
/// - `EventConfig::filter` (e.g. `event.total > 100`)
/// - Resolving `DynamicValue::Expression` fields (`input`, `transformPayload`,
///   `deduplicationKey`, `transform`)
pub struct TriggerEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("match", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let pattern = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                // Simple substring match (not regex, for security/simplicity).
                Ok(json!(subject.contains(pattern)))
            })
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean result using JavaScript-like
    /// truthiness coercion.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;
        Ok(Self::value_to_bool(&result))
    }

    /// Evaluate a `condition` / `filter` / `validatePayload` predicate against
    /// a `TriggerContext`'s eval context (`{trigger, event}`).
    pub fn evaluate_predicate(
        &self,
        expression: &str,
        context: &TriggerContext,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expression, &context.to_eval_context())
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Resolve a `DynamicValue` against a context object: literals pass
    /// through unchanged, expressions are evaluated.
    pub fn resolve_dynamic(
        &self,
        dynamic: &DynamicValue,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        match dynamic {
            DynamicValue::Literal { value } => Ok(value.clone()),
            DynamicValue::Expression { expr } => self.evaluate_value(expr, context),
        }
    }

    fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
