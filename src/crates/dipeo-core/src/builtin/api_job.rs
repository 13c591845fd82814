//! `api_job`: a single HTTP call through the registered HTTP client.

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
use super::services_api::HttpClient;

struct ApiJobHandler;

#[async_trait]
impl Handler for ApiJobHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        _inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<api_job>");
        let url = props
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation {
                node_id: node_id.to_string(),
                field_errors: vec![("url".to_string(), "required".to_string())],
            })?;
        let method = props
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET");
        let headers = props.get("headers").cloned().unwrap_or(json!({}));
        let body = props.get("body");

        let client: Arc<dyn HttpClient> = resolve_typed(services, node_id, "http_client")?;
        let response = client.request(method, url, &headers, body).await?;

        Ok(NodeOutput::new().with_value("default", response))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "api_job".to_string(),
            requires_services: vec!["http_client".to_string()],
            optional_services: vec![],
            handler: Arc::new(ApiJobHandler),
        },
        Some(&json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string" },
                "headers": { "type": "object" },
                "body": {}
            }
        })),
    )
}
