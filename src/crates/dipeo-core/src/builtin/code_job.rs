//! `job` / `code_job`: sandboxed code execution. Both type names share one
//! handler and schema — `job` is the legacy name, `code_job` the current
//! one; the core makes no behavioral distinction between them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContextSnapshot;
use crate::error::{CoreError, Result};
use crate::handler::Handler;
use crate::registry::{HandlerDefinition, HandlerRegistry};
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

use super::resolve_typed;
use super::services_api::CodeRunner;

struct CodeJobHandler;

#[async_trait]
impl Handler for CodeJobHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<code_job>");
        let language = props
            .get("language")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("language".to_string(), "required".to_string())],
            })?;
        if !matches!(language, "python" | "javascript" | "bash") {
            return Err(CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![(
                    "language".to_string(),
                    format!("unsupported language '{language}'"),
                )],
            });
        }
        let code = props
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("code".to_string(), "required".to_string())],
            })?;

        let runner: Arc<dyn CodeRunner> = resolve_typed(services, node_id, "code_runner")?;
        let inputs_value: Value = serde_json::to_value(inputs).unwrap_or(Value::Null);

        let timeout_seconds = props.get("timeout").and_then(|v| v.as_u64());
        let run = runner.run(language, code, &inputs_value);
        let result = match timeout_seconds {
            Some(secs) => {
                match tokio::time::timeout(std::time::Duration::from_secs(secs), run).await {
                    Ok(inner) => inner?,
                    Err(_) => {
                        return Err(CoreError::Timeout {
                            node_id: Some(node_id.to_string()),
                            elapsed_ms: secs * 1000,
                        });
                    }
                }
            }
            None => run.await?,
        };

        Ok(NodeOutput::new().with_value("default", result))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry, node_type: &str) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: node_type.to_string(),
            requires_services: vec!["code_runner".to_string()],
            optional_services: vec![],
            handler: Arc::new(CodeJobHandler),
        },
        Some(&json!({
            "type": "object",
            "required": ["language", "code"],
            "properties": {
                "language": { "type": "string", "enum": ["python", "javascript", "bash"] },
                "code": { "type": "string" },
                "timeout": { "type": "integer", "minimum": 1 }
            }
        })),
    )
}
