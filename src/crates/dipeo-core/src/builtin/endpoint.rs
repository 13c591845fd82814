//! `endpoint`: terminal node. Passes its `default` input through unchanged
//! and, when `save_to_file` is set, writes it to `file_name` via the file
//! store — the same service `db` nodes use, since writing a run's final
//! result to disk is not a distinct capability.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContextSnapshot;
use crate::error::Result;
use crate::handler::Handler;
use crate::registry::{HandlerDefinition, HandlerRegistry};
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

use super::resolve_typed;
use super::services_api::FileStore;

struct EndpointHandler;

#[async_trait]
impl Handler for EndpointHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let value = inputs.get("default").cloned().unwrap_or(Value::Null);

        let save_to_file = props.get("save_to_file").and_then(|v| v.as_bool()).unwrap_or(false);
        if save_to_file {
            let node_id = context.current_node_id.as_deref().unwrap_or("<endpoint>");
            let file_name = props
                .get("file_name")
                .and_then(|v| v.as_str())
                .unwrap_or("output.json");
            let store: Arc<dyn FileStore> = resolve_typed(services, node_id, "file_store")?;
            let content = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            store.write(file_name, &content).await?;
        }

        Ok(NodeOutput::new().with_value("default", value))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "endpoint".to_string(),
            // Declared the same way the reference handler declares services
            // it may not call on every invocation (e.g. an interactive
            // handler only used when a prop enables it): `file_store` is
            // only ever touched when `save_to_file` is set, but the
            // dependency is still named up front rather than resolved
            // ad hoc.
            requires_services: vec!["file_store".to_string()],
            optional_services: vec![],
            handler: Arc::new(EndpointHandler),
        },
        Some(&json!({
            "type": "object",
            "properties": {
                "save_to_file": { "type": "boolean" },
                "file_name": { "type": "string" }
            }
        })),
    )
}
