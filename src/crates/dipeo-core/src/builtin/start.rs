//! `start`: seeds the run with its configured `custom_data`, under
//! `default`. `trigger_mode` is accepted but purely descriptive — the
//! scheduler's ready-set predicate treats every `start` node as trivially
//! ready regardless of its value.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::context::ExecutionContextSnapshot;
use crate::error::Result;
use crate::handler::Handler;
use crate::registry::{HandlerDefinition, HandlerRegistry};
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn invoke(
        &self,
        props: &Value,
        _context: &ExecutionContextSnapshot,
        _inputs: &HashMap<String, Value>,
        _services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let value = props.get("custom_data").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_value("default", value))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "start".to_string(),
            requires_services: vec![],
            optional_services: vec![],
            handler: std::sync::Arc::new(StartHandler),
        },
        Some(&json!({
            "type": "object",
            "properties": {
                "custom_data": {},
                "trigger_mode": { "type": "string" }
            }
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Diagram, NodeType};

    fn snapshot() -> ExecutionContextSnapshot {
        let ctx = crate::context::ExecutionContext::new(
            "e1",
            &Diagram {
                id: None,
                nodes: vec![],
                arrows: vec![],
                persons: vec![],
            },
            Value::Null,
            HashMap::new(),
        );
        ctx.snapshot()
    }

    #[tokio::test]
    async fn forwards_custom_data_as_default() {
        let handler = StartHandler;
        let out = handler
            .invoke(
                &json!({"custom_data": {"x": 1}}),
                &snapshot(),
                &HashMap::new(),
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.value.get("default"), Some(&json!({"x": 1})));
        let _ = NodeType::Start;
    }
}
