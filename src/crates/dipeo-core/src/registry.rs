//! Handler Registry (C1): binds a node type name to its property schema,
//! declared service dependencies, and invocation function.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::handler::Handler;

/// Whether the process is running in production. Registration re-binding a
/// node type is idempotent everywhere except here, matching the Service
/// Registry's production-override rules (C2) this registry mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// One node type's binding: schema, service requirements, invocation function.
pub struct HandlerDefinition {
    pub node_type: String,
    pub requires_services: Vec<String>,
    /// Resolved best-effort alongside `requires_services`: missing bindings
    /// are silently left out of the handler's services map rather than
    /// failing the node, mirroring how the reference person_job handler
    /// tolerates an absent memory service.
    pub optional_services: Vec<String>,
    pub handler: Arc<dyn Handler>,
}

struct CompiledHandler {
    requires_services: Vec<String>,
    optional_services: Vec<String>,
    handler: Arc<dyn Handler>,
    schema: Option<Arc<jsonschema::JSONSchema>>,
}

/// Process-wide map from node type name to its handler binding.
///
/// Registration is idempotent per `node_type`: calling `register` again with
/// the same type replaces the previous binding, except in
/// [`Environment::Production`] where a second registration is rejected.
pub struct HandlerRegistry {
    handlers: HashMap<String, CompiledHandler>,
    environment: Environment,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            environment: Environment::Development,
        }
    }

    pub fn with_environment(environment: Environment) -> Self {
        Self {
            handlers: HashMap::new(),
            environment,
        }
    }

    /// Registers a handler for `definition.node_type`, with no property
    /// schema beyond "is a JSON object". Use [`Self::register_with_schema`]
    /// to enforce a typed schema at validation time (§4.5 step 2).
    pub fn register(&mut self, definition: HandlerDefinition) -> Result<()> {
        self.register_with_schema(definition, None)
    }

    pub fn register_with_schema(
        &mut self,
        definition: HandlerDefinition,
        schema: Option<&Value>,
    ) -> Result<()> {
        if self.environment == Environment::Production
            && self.handlers.contains_key(&definition.node_type)
        {
            return Err(CoreError::Internal(format!(
                "handler for node type '{}' is already registered and cannot be replaced in production",
                definition.node_type
            )));
        }

        let compiled_schema = match schema {
            Some(s) => Some(Arc::new(jsonschema::JSONSchema::compile(s).map_err(|e| {
                CoreError::Internal(format!(
                    "invalid property schema for node type '{}': {e}",
                    definition.node_type
                ))
            })?)),
            None => None,
        };

        self.handlers.insert(
            definition.node_type.clone(),
            CompiledHandler {
                requires_services: definition.requires_services,
                optional_services: definition.optional_services,
                handler: definition.handler,
                schema: compiled_schema,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, node_type: &str) -> Option<&dyn Handler> {
        self.handlers.get(node_type).map(|h| h.handler.as_ref())
    }

    pub fn requires_services(&self, node_type: &str) -> &[String] {
        self.handlers
            .get(node_type)
            .map(|h| h.requires_services.as_slice())
            .unwrap_or(&[])
    }

    /// Services resolved best-effort for `node_type`: absence from the
    /// process-wide Service Registry is not an error, the handler just
    /// never sees the key in its services map.
    pub fn optional_services_for(&self, node_type: &str) -> &[String] {
        self.handlers
            .get(node_type)
            .map(|h| h.optional_services.as_slice())
            .unwrap_or(&[])
    }

    /// Diagnostic lookup used by diagram validation tooling to ask which
    /// services a diagram will need before running it.
    pub fn service_dependencies_for(&self, node_type: &str) -> Vec<String> {
        self.requires_services(node_type).to_vec()
    }

    /// Validates `properties` against the registered schema for `node_type`,
    /// per §4.5 step 2. Returns `field_path: msg` pairs on failure. A node
    /// type with no schema registered always validates.
    pub fn validate_properties(
        &self,
        node_type: &str,
        properties: &Value,
    ) -> std::result::Result<(), Vec<(String, String)>> {
        let Some(compiled) = self.handlers.get(node_type) else {
            return Ok(());
        };
        let Some(schema) = &compiled.schema else {
            return Ok(());
        };
        let result = schema.validate(properties);
        match result {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    let path = if path.is_empty() {
                        "<root>".to_string()
                    } else {
                        path
                    };
                    (path, e.to_string())
                })
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::NodeOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap as Map;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn invoke(
            &self,
            _props: &Value,
            _ctx: &crate::context::ExecutionContextSnapshot,
            _inputs: &Map<String, Value>,
            _services: &Map<String, crate::services::ServiceHandle>,
        ) -> Result<NodeOutput> {
            Ok(NodeOutput::new())
        }
    }

    #[test]
    fn register_then_lookup() {
        let mut r = HandlerRegistry::new();
        r.register(HandlerDefinition {
            node_type: "start".into(),
            requires_services: vec![],
            optional_services: vec![],
            handler: Arc::new(NoopHandler),
        })
        .unwrap();
        assert!(r.lookup("start").is_some());
        assert!(r.lookup("missing").is_none());
    }

    #[test]
    fn production_rejects_second_registration() {
        let mut r = HandlerRegistry::with_environment(Environment::Production);
        r.register(HandlerDefinition {
            node_type: "start".into(),
            requires_services: vec![],
            optional_services: vec![],
            handler: Arc::new(NoopHandler),
        })
        .unwrap();
        let err = r.register(HandlerDefinition {
            node_type: "start".into(),
            requires_services: vec![],
            optional_services: vec![],
            handler: Arc::new(NoopHandler),
        });
        assert!(err.is_err());
    }

    #[test]
    fn schema_validation_reports_field_path() {
        let mut r = HandlerRegistry::new();
        r.register_with_schema(
            HandlerDefinition {
                node_type: "api_job".into(),
                requires_services: vec![],
                optional_services: vec![],
                handler: Arc::new(NoopHandler),
            },
            Some(&json!({
                "type": "object",
                "required": ["url"],
                "properties": { "url": { "type": "string" } }
            })),
        )
        .unwrap();

        let errors = r
            .validate_properties("api_job", &json!({}))
            .unwrap_err();
        assert!(!errors.is_empty());
    }
}
