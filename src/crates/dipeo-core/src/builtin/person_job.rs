//! `person_job`: one LLM call against a person's conversation memory.
//!
//! Prompt selection follows the reference handler: `first_only_prompt` wins
//! on the node's first execution (`exec_count == 0`), otherwise `prompt` or
//! `default_prompt`. A `{{key}}` placeholder is substituted from `inputs`
//! by plain string replacement — a placeholder with no matching input is
//! left verbatim rather than erroring.
//!
//! `context_cleaning_rule` governs what the person forgets before this
//! turn's call: `"no_forget"` (default) leaves memory untouched,
//! `"on_every_turn"` forgets everything the person has seen so far,
//! anything else forgets only messages the person itself authored.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContextSnapshot;
use crate::diagram::Person;
use crate::error::{CoreError, Result};
use crate::handler::Handler;
use crate::memory::ConversationStore;
use crate::registry::{HandlerDefinition, HandlerRegistry};
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

use super::resolve_typed;
use super::services_api::{LlmClient, LlmMessage, LlmRequest};

struct PersonJobHandler;

fn effective_prompt(props: &Value, exec_count: u32) -> Option<String> {
    if exec_count == 0 {
        if let Some(p) = props.get("first_only_prompt").and_then(|v| v.as_str()) {
            return Some(p.to_string());
        }
    }
    props
        .get("prompt")
        .and_then(|v| v.as_str())
        .or_else(|| props.get("default_prompt").and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn substitute(prompt: &str, inputs: &HashMap<String, Value>) -> String {
    let mut result = prompt.to_string();
    for (key, value) in inputs {
        let placeholder = format!("{{{{{key}}}}}");
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        result = result.replace(&placeholder, &rendered);
    }
    result
}

fn resolve_person(props: &Value, context: &ExecutionContextSnapshot, node_id: &str) -> Result<Person> {
    if let Some(person_id) = props.get("person_id").and_then(|v| v.as_str()) {
        return context.persons.get(person_id).cloned().ok_or_else(|| CoreError::Validation {
            node_id: node_id.to_string(),
            field_errors: vec![(
                "person_id".to_string(),
                format!("no person registered with id '{person_id}'"),
            )],
        });
    }
    if let Some(inline) = props.get("person") {
        return serde_json::from_value(inline.clone()).map_err(|e| CoreError::Validation {
            node_id: node_id.to_string(),
            field_errors: vec![("person".to_string(), e.to_string())],
        });
    }
    Err(CoreError::Validation {
        node_id: node_id.to_string(),
        field_errors: vec![(
            "person_id".to_string(),
            "either person_id or an inline person must be provided".to_string(),
        )],
    })
}

#[async_trait]
impl Handler for PersonJobHandler {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput> {
        let node_id = context.current_node_id.as_deref().unwrap_or("<person_job>");
        let exec_count = context.exec_counts.get(node_id).copied().unwrap_or(0);

        let prompt = effective_prompt(props, exec_count).ok_or_else(|| CoreError::Validation {
            node_id: node_id.to_string(),
            field_errors: vec![(
                "prompt".to_string(),
                "one of prompt, default_prompt, first_only_prompt is required".to_string(),
            )],
        })?;

        let person = resolve_person(props, context, node_id)?;
        let person_id = if props.get("person_id").is_some() {
            person.id.clone()
        } else {
            node_id.to_string()
        };

        let llm: Arc<dyn LlmClient> = resolve_typed(services, node_id, "llm")?;
        let store: Option<Arc<ConversationStore>> =
            resolve_typed(services, node_id, "conversation_store").ok();

        let cleaning_rule = props
            .get("context_cleaning_rule")
            .and_then(|v| v.as_str())
            .unwrap_or("no_forget");
        if let Some(store) = &store {
            match cleaning_rule {
                "no_forget" => {}
                "on_every_turn" => store.forget_for_person(&person_id, None),
                _ => store.forget_own_messages(&person_id, None),
            }
        }

        let final_prompt = substitute(&prompt, inputs);

        let mut messages = Vec::new();
        if let Some(store) = &store {
            for visible in store.visible_messages(&person_id) {
                messages.push(LlmMessage {
                    role: visible.role,
                    content: visible.content,
                });
            }
        }
        messages.push(LlmMessage {
            role: "user",
            content: final_prompt.clone(),
        });

        let response = llm
            .complete(LlmRequest {
                model: person.model.clone(),
                system_prompt: person.system_prompt.clone(),
                messages,
            })
            .await
            .map_err(|e| CoreError::HandlerFailure {
                node_id: node_id.to_string(),
                message: e.to_string(),
            })?;

        if let Some(store) = &store {
            store.add_message(
                final_prompt,
                person_id.clone(),
                context.execution_id.clone(),
                &[],
                node_id.to_string(),
                None,
                Some(response.tokens),
            );
            store.add_message(
                response.content.clone(),
                person_id,
                context.execution_id.clone(),
                &[],
                node_id.to_string(),
                None,
                Some(response.tokens),
            );
        }

        Ok(NodeOutput::new()
            .with_value("default", Value::String(response.content))
            .with_metadata("tokenUsage", serde_json::to_value(response.tokens).unwrap()))
    }
}

pub(super) fn register(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_with_schema(
        HandlerDefinition {
            node_type: "person_job".to_string(),
            requires_services: vec!["llm".to_string()],
            optional_services: vec!["conversation_store".to_string()],
            handler: Arc::new(PersonJobHandler),
        },
        Some(&json!({
            "type": "object",
            "properties": {
                "person_id": { "type": "string" },
                "person": { "type": "object" },
                "prompt": { "type": "string" },
                "default_prompt": { "type": "string" },
                "first_only_prompt": { "type": "string" },
                "max_iteration": { "type": "integer", "minimum": 1 },
                "context_cleaning_rule": { "type": "string" }
            }
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_only_prompt_wins_on_first_execution() {
        let props = json!({"first_only_prompt": "hello", "prompt": "later"});
        assert_eq!(effective_prompt(&props, 0), Some("hello".to_string()));
        assert_eq!(effective_prompt(&props, 1), Some("later".to_string()));
    }

    #[test]
    fn substitute_leaves_unresolved_placeholders_verbatim() {
        let mut inputs = HashMap::new();
        inputs.insert("name".to_string(), json!("Ada"));
        let out = substitute("hi {{name}}, re {{missing}}", &inputs);
        assert_eq!(out, "hi Ada, re {{missing}}");
    }
}
