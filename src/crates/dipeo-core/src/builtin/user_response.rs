//! `user_response`: blocks on a human answer through the interactive
//! responder, bounded by `timeout` seconds.

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
use super::services_api::InteractiveResponder;

struct UserResponseHandler;

#[async_trait]
impl Handler for UserResponseHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        _inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<user_response>");
        let prompt = props
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("prompt".to_string(), "required".to_string())],
            })?;
        let timeout_seconds = props.get("timeout").and_then(|v| v.as_u64());

        let responder: Arc<dyn InteractiveResponder> =
            resolve_typed(services, node_id, "interactive_responder")?;
        let answer = responder.ask(prompt, timeout_seconds).await?;

        Ok(NodeOutput::new().with_value("default", Value::String(answer)))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "user_response".to_string(),
            requires_services: vec!["interactive_responder".to_string()],
            optional_services: vec![],
            handler: Arc::new(UserResponseHandler),
        },
        Some(&json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string" },
                "timeout": { "type": "integer", "minimum": 1 }
            }
        })),
    )
}
