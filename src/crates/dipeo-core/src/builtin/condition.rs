//! `condition`: evaluates a boolean expression against the node's inputs
//! and run variables, forwards every input value through unchanged, and
//! additionally publishes the result under `"true"`/`"false"` so a
//! downstream arrow can read whichever branch fired. The boolean itself is
//! recorded as `metadata.condition_result`, which is what edge routing
//! (§4.4 step 2) and re-arming (§4.6) actually key off of.
//!
//! `condition_type`:
//! - `"expression"` (default) — evaluate `expression` via a small
//!   `inputs['label']['field']` / `variables['key']` substitution into
//!   `evalexpr`.
//! - `"always_true"` / `"always_false"` — fixed result, no expression needed.

use async_trait::async_trait;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EValue};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::context::ExecutionContextSnapshot;
use crate::error::{CoreError, Result};
use crate::handler::Handler;
use crate::registry::{HandlerDefinition, HandlerRegistry};
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

struct ConditionHandler;

fn indexed_reference_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(inputs|variables)\['([A-Za-z0-9_]+)'\](?:\['([A-Za-z0-9_]+)'\])?").unwrap()
    })
}

fn json_to_evalexpr(v: &Value) -> Option<EValue> {
    match v {
        Value::Bool(b) => Some(EValue::Boolean(*b)),
        Value::Number(n) => n.as_f64().map(EValue::Float),
        Value::String(s) => Some(EValue::String(s.clone())),
        _ => None,
    }
}

/// Rewrites every `inputs['label']['field']` / `variables['key']` reference
/// in `expr` into a plain identifier evalexpr can bind, and returns the
/// context carrying those bindings alongside the rewritten expression.
fn build_context(
    expr: &str,
    inputs: &HashMap<String, Value>,
    variables: &Value,
) -> (String, HashMapContext) {
    let mut context = HashMapContext::new();
    let mut counter = 0usize;
    let rewritten = indexed_reference_pattern()
        .replace_all(expr, |caps: &regex::Captures| {
            let root = &caps[1];
            let key = &caps[2];
            let field = caps.get(3).map(|m| m.as_str());

            let value = if root == "inputs" {
                match field {
                    Some(f) => inputs.get(key).and_then(|v| v.get(f)).cloned(),
                    None => inputs.get(key).cloned(),
                }
            } else {
                match field {
                    Some(f) => variables.get(key).and_then(|v| v.get(f)).cloned(),
                    None => variables.get(key).cloned(),
                }
            };

            let ident = format!("__ref_{counter}");
            counter += 1;
            if let Some(ev) = value.as_ref().and_then(json_to_evalexpr) {
                let _ = context.set_value(ident.clone(), ev);
            }
            ident
        })
        .into_owned();
    (rewritten, context)
}

fn evaluate(
    node_id: &str,
    props: &Value,
    inputs: &HashMap<String, Value>,
    variables: &Value,
) -> Result<bool> {
    let condition_type = props
        .get("condition_type")
        .and_then(|v| v.as_str())
        .unwrap_or("expression");

    match condition_type {
        "always_true" => Ok(true),
        "always_false" => Ok(false),
        "expression" => {
            let expr = props
                .get("expression")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::Validation {
                    node_id: node_id.to_string(),
                    field_errors: vec![(
                        "expression".to_string(),
                        "required for condition_type 'expression'".to_string(),
                    )],
                })?;
            let (rewritten, context) = build_context(expr, inputs, variables);
            let result = evalexpr::eval_boolean_with_context(&rewritten, &context).map_err(|e| {
                CoreError::Validation {
                    node_id: node_id.to_string(),
                    field_errors: vec![("expression".to_string(), e.to_string())],
                }
            })?;
            Ok(result)
        }
        other => Err(CoreError::Validation {
            node_id: node_id.to_string(),
            field_errors: vec![(
                "condition_type".to_string(),
                format!("unknown condition_type '{other}'"),
            )],
        }),
    }
}

#[async_trait]
impl Handler for ConditionHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        _services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context
            .current_node_id
            .as_deref()
            .unwrap_or("<condition>");
        let result = evaluate(node_id, props, inputs, &context.variables)?;

        let mut output = NodeOutput::new();
        for (k, v) in inputs {
            output = output.with_value(k.clone(), v.clone());
        }
        output = output.with_value(result.to_string(), Value::Bool(result));
        output = output.with_metadata("condition_result", Value::Bool(result));
        Ok(output)
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "condition".to_string(),
            requires_services: vec![],
            optional_services: vec![],
            handler: std::sync::Arc::new(ConditionHandler),
        },
        Some(&json!({
            "type": "object",
            "properties": {
                "condition_type": { "type": "string" },
                "expression": { "type": "string" }
            }
        })),
    )
}
