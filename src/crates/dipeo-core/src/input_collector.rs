//! Input Collector (C6): gathers a node's inputs from its producers' outputs,
//! applying conditional-branch routing and person-job first/default edge
//! selection (§4.6).

use serde_json::Value;
use std::collections::HashMap;

use crate::view::{EdgeView, ExecutionView, NodeView};

/// Computes `inputs` for `node`, depending only on the current outputs of
/// its immediate producers and its own `exec_count` — recomputing with the
/// same view state always yields the same result.
pub fn collect_inputs(view: &ExecutionView, node: &NodeView) -> HashMap<String, Value> {
    let is_person_job = node.node_type().is_person_job();
    let first_edges: Vec<&EdgeView> = node.first_edges().collect();
    let default_edges: Vec<&EdgeView> = node.default_edges().collect();

    let selected: Vec<&EdgeView> = if is_person_job && node.exec_count() == 0 && !first_edges.is_empty() {
        first_edges
    } else if is_person_job {
        default_edges
    } else {
        default_edges.into_iter().chain(first_edges).collect()
    };

    let mut inputs = HashMap::new();
    for edge in selected {
        let Some(source) = view.get(&edge.source) else {
            continue;
        };
        let Some(output) = source.output() else {
            continue;
        };

        if source.node_type().is_condition() {
            if let (Some(branch), Some(result)) = (edge.branch, output.condition_result()) {
                if branch != result {
                    continue;
                }
            }
        }

        let label = edge.label.as_str();
        if let Some(value) = output.value.get(label) {
            inputs.insert(label.to_string(), value.clone());
        } else if label == "default" {
            if let Some(conversation) = output.value.get("conversation") {
                inputs.insert("default".to_string(), conversation.clone());
            }
        }
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Arrow, Diagram, Node, NodeType};
    use crate::registry::HandlerRegistry;
    use crate::view::NodeOutput;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl crate::handler::Handler for NoopHandler {
        async fn invoke(
            &self,
            _props: &Value,
            _ctx: &crate::context::ExecutionContextSnapshot,
            _inputs: &HashMap<String, Value>,
            _services: &HashMap<String, crate::services::ServiceHandle>,
        ) -> crate::error::Result<NodeOutput> {
            Ok(NodeOutput::new())
        }
    }

    fn registry() -> HandlerRegistry {
        let mut r = HandlerRegistry::new();
        for ty in ["start", "condition", "person_job", "endpoint"] {
            r.register(crate::registry::HandlerDefinition {
                node_type: ty.to_string(),
                requires_services: vec![],
                optional_services: vec![],
                handler: std::sync::Arc::new(NoopHandler),
            })
            .unwrap();
        }
        r
    }

    fn node(id: &str, ty: NodeType) -> Node {
        Node {
            id: id.to_string(),
            node_type: ty,
            properties: json!({}),
            label: None,
            person_id: None,
        }
    }

    #[test]
    fn condition_branch_filters_edges() {
        let d = Diagram {
            id: None,
            nodes: vec![
                node("cond", NodeType::Condition),
                node("a", NodeType::Endpoint),
                node("b", NodeType::Endpoint),
            ],
            arrows: vec![
                Arrow {
                    source: "cond".into(),
                    target: "a".into(),
                    label: None,
                    branch: Some(true),
                    content_type: None,
                },
                Arrow {
                    source: "cond".into(),
                    target: "b".into(),
                    label: None,
                    branch: Some(false),
                    content_type: None,
                },
            ],
            persons: vec![],
        };
        let view = crate::view::ExecutionView::build(&d, &registry()).unwrap();
        view.get("cond").unwrap().record_output(
            NodeOutput::new()
                .with_value("default", json!(1))
                .with_metadata("condition_result", json!(false)),
        );

        let a_inputs = collect_inputs(&view, view.get("a").unwrap());
        assert!(a_inputs.is_empty());
        let b_inputs = collect_inputs(&view, view.get("b").unwrap());
        assert_eq!(b_inputs.get("default"), Some(&json!(1)));
    }

    #[test]
    fn person_job_prefers_first_edges_on_first_run() {
        let d = Diagram {
            id: None,
            nodes: vec![node("start", NodeType::Start), node("pj", NodeType::PersonJob)],
            arrows: vec![
                Arrow {
                    source: "start".into(),
                    target: "pj:first".into(),
                    label: Some("default".into()),
                    branch: None,
                    content_type: None,
                },
                Arrow {
                    source: "pj".into(),
                    target: "pj".into(),
                    label: Some("default".into()),
                    branch: None,
                    content_type: None,
                },
            ],
            persons: vec![],
        };
        let view = crate::view::ExecutionView::build(&d, &registry()).unwrap();
        view.get("start")
            .unwrap()
            .record_output(NodeOutput::new().with_value("default", json!("seed")));

        let inputs = collect_inputs(&view, view.get("pj").unwrap());
        assert_eq!(inputs.get("default"), Some(&json!("seed")));
    }

    #[test]
    fn conversation_passthrough_on_default_label() {
        let d = Diagram {
            id: None,
            nodes: vec![node("a", NodeType::Start), node("b", NodeType::Endpoint)],
            arrows: vec![Arrow {
                source: "a".into(),
                target: "b".into(),
                label: None,
                branch: None,
                content_type: None,
            }],
            persons: vec![],
        };
        let view = crate::view::ExecutionView::build(&d, &registry()).unwrap();
        view.get("a")
            .unwrap()
            .record_output(NodeOutput::new().with_value("conversation", json!("hist")));

        let inputs = collect_inputs(&view, view.get("b").unwrap());
        assert_eq!(inputs.get("default"), Some(&json!("hist")));
    }
}
