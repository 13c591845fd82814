//! `notion` / `integrated_api`: a single provider operation through the
//! provider client. `notion` is the legacy, single-provider name;
//! `integrated_api` generalizes it with an explicit `provider` field — the
//! core treats both identically and leaves provider semantics entirely to
//! whatever is bound under `"provider_client"`.

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
use super::services_api::ProviderClient;

struct NotionHandler;

#[async_trait]
impl Handler for NotionHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        _inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<notion>");
        let provider = props
            .get("provider")
            .and_then(|v| v.as_str())
            .unwrap_or("notion");
        let operation = props
            .get("operation")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("operation".to_string(), "required".to_string())],
            })?;
        let resource_id = props.get("resource_id").and_then(|v| v.as_str());
        let config = props.get("config").cloned().unwrap_or(json!({}));

        let client: Arc<dyn ProviderClient> =
            resolve_typed(services, node_id, "provider_client")?;
        let result = client.call(provider, operation, resource_id, &config).await?;

        Ok(NodeOutput::new().with_value("default", result))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry, node_type: &str) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: node_type.to_string(),
            requires_services: vec!["provider_client".to_string()],
            optional_services: vec![],
            handler: Arc::new(NotionHandler),
        },
        Some(&json!({
            "type": "object",
            "required": ["operation"],
            "properties": {
                "provider": { "type": "string" },
                "operation": { "type": "string" },
                "resource_id": { "type": "string" },
                "config": { "type": "object" }
            }
        })),
    )
}
