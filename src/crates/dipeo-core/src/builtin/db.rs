//! `db`: file read/write/append through the file store. `operation` selects
//! the verb; `source_details` is interpreted as a path. Read operations
//! return the file's content under `default`; write/append return a short
//! status string instead, matching the "content or status" output the
//! contract table calls for.

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
use super::services_api::FileStore;

struct DbHandler;

#[async_trait]
impl Handler for DbHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<db>");
        let operation = props
            .get("operation")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("operation".to_string(), "required".to_string())],
            })?;
        let path = props
            .get("source_details")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("source_details".to_string(), "required".to_string())],
            })?;

        let store: Arc<dyn FileStore> = resolve_typed(services, node_id, "file_store")?;

        let value = match operation {
            "read" => Value::String(store.read(path).await?),
            "write" => {
                let content = inputs
                    .get("default")
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                store.write(path, &content).await?;
                json!({"status": "written", "path": path})
            }
            "append" => {
                let content = inputs
                    .get("default")
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                store.append(path, &content).await?;
                json!({"status": "appended", "path": path})
            }
            other => {
                return Err(CoreError::Validation {
                    node_id: node_id.to_string(),
                    field_errors: vec![(
                        "operation".to_string(),
                        format!("unknown operation '{other}'"),
                    )],
                });
            }
        };

        Ok(NodeOutput::new().with_value("default", value))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "db".to_string(),
            requires_services: vec!["file_store".to_string()],
            optional_services: vec![],
            handler: Arc::new(DbHandler),
        },
        Some(&json!({
            "type": "object",
            "required": ["operation", "source_details"],
            "properties": {
                "operation": { "type": "string", "enum": ["read", "write", "append"] },
                "source_details": { "type": "string" }
            }
        })),
    )
}
