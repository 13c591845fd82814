//! Execution View (C4): the immutable structural projection of a [`Diagram`]
//! the scheduler actually runs on.
//!
//! Construction is a pure function: indexing nodes, resolving arrow endpoints
//! into [`EdgeView`]s, binding handlers, and computing an initial topological
//! leveling via Kahn's algorithm. The level assignment is a diagnostic hint,
//! not a correctness requirement — the scheduler's ready-set predicate
//! ([`crate::scheduler`]) is what actually decides when a node may run, and
//! it tolerates nodes Kahn's pass never reached (cycles, person-job loops).
//!
//! Only three fields on [`NodeView`] change after construction: `exec_count`,
//! `output`, `completed`. Everything else — edges, handler binding, levels —
//! is fixed for the lifetime of the view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use crate::diagram::{Diagram, Endpoint, Node, NodeId, NodeType, Person, PersonId};
use crate::error::{CoreError, Result};
use crate::registry::HandlerRegistry;

/// One producer's result for a single run of a node.
///
/// `value` is keyed by edge label; a consumer reads `value[arrow.label]`.
/// `metadata` carries status, error text, token usage, and (for `condition`
/// nodes) the boolean `condition_result` branch routing reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    pub value: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.value.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> Option<&str> {
        self.metadata.get("status").and_then(|v| v.as_str())
    }

    pub fn condition_result(&self) -> Option<bool> {
        self.metadata.get("condition_result").and_then(|v| v.as_bool())
    }
}

/// A resolved arrow: both endpoints bound to their node index, with handle,
/// label and branch metadata carried over from the authored [`Arrow`].
#[derive(Debug, Clone)]
pub struct EdgeView {
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: String,
    pub target_handle: String,
    pub label: String,
    pub branch: Option<bool>,
    pub content_type: Option<String>,
}

/// A node plus its resolved edges and mutable per-run state.
///
/// The mutable fields (`exec_count`, `output`, `completed`) are the *only*
/// state that changes once the view is built; they live behind a lock so the
/// scheduler can run a batch of nodes concurrently while reading peers'
/// outputs for input collection.
pub struct NodeView {
    pub node: Node,
    pub incoming: Vec<EdgeView>,
    pub outgoing: Vec<EdgeView>,
    pub person: Option<Person>,
    pub max_iterations: u32,
    state: RwLock<NodeRuntimeState>,
}

#[derive(Debug, Default, Clone)]
struct NodeRuntimeState {
    exec_count: u32,
    output: Option<NodeOutput>,
    completed: bool,
}

impl NodeView {
    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn node_type(&self) -> &NodeType {
        &self.node.node_type
    }

    pub fn exec_count(&self) -> u32 {
        self.state.read().unwrap().exec_count
    }

    pub fn completed(&self) -> bool {
        self.state.read().unwrap().completed
    }

    pub fn output(&self) -> Option<NodeOutput> {
        self.state.read().unwrap().output.clone()
    }

    pub fn has_output(&self) -> bool {
        self.state.read().unwrap().output.is_some()
    }

    /// Writes `output`, bumps `exec_count`, and marks `completed` once the
    /// cap is reached. This is the only place exec_count/output are set
    /// during normal (non-re-arming) operation — one writer per node per
    /// batch, enforced by the scheduler never running the same node twice
    /// in one batch.
    pub fn record_output(&self, output: NodeOutput) {
        let mut state = self.state.write().unwrap();
        state.output = Some(output);
        state.exec_count += 1;
        if state.exec_count >= self.max_iterations {
            state.completed = true;
        }
    }

    /// Clears `output` without touching `exec_count`/`completed` — the one
    /// legal "unget", reserved for condition-node re-arming (§4.5).
    pub fn rearm(&self) {
        let mut state = self.state.write().unwrap();
        state.output = None;
    }

    pub fn first_edges(&self) -> impl Iterator<Item = &EdgeView> {
        self.incoming.iter().filter(|e| e.target_handle == "first")
    }

    pub fn default_edges(&self) -> impl Iterator<Item = &EdgeView> {
        self.incoming.iter().filter(|e| e.target_handle != "first")
    }
}

/// A non-fatal diagram-authoring issue noticed while building the view:
/// duplicate edge labels into one target handle, or a node unreached by the
/// initial Kahn pass. Construction proceeds regardless; the ready-set loop
/// is the actual arbiter of whether an "orphan" node ever runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewWarning {
    DuplicateLabel {
        node_id: NodeId,
        handle: String,
        label: String,
    },
    UnreachableAtLevel0 {
        node_id: NodeId,
    },
}

/// The immutable structural projection the scheduler operates on for one run.
pub struct ExecutionView {
    pub nodes: HashMap<NodeId, NodeView>,
    pub order: Vec<NodeId>,
    pub initial_levels: Vec<Vec<NodeId>>,
    pub warnings: Vec<ViewWarning>,
}

impl ExecutionView {
    /// Builds the view from a diagram and a handler registry, per §4.4.
    /// Pure: invoking this twice on the same diagram yields structurally
    /// equal views (same nodes, edges, levels).
    pub fn build(diagram: &Diagram, registry: &HandlerRegistry) -> Result<Self> {
        diagram.validate()?;

        let persons = diagram.persons_by_id();
        let mut incoming: HashMap<NodeId, Vec<EdgeView>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<EdgeView>> = HashMap::new();
        for node in &diagram.nodes {
            incoming.insert(node.id.clone(), Vec::new());
            outgoing.insert(node.id.clone(), Vec::new());
        }

        let mut warnings = Vec::new();
        let mut seen_labels: HashSet<(NodeId, String, String)> = HashSet::new();

        for arrow in &diagram.arrows {
            let src = Endpoint::parse(&arrow.source);
            let dst = Endpoint::parse(&arrow.target);
            let label = arrow.label_or_default().to_string();

            let key = (dst.node_id.clone(), dst.handle.clone(), label.clone());
            if !seen_labels.insert(key) {
                warnings.push(ViewWarning::DuplicateLabel {
                    node_id: dst.node_id.clone(),
                    handle: dst.handle.clone(),
                    label: label.clone(),
                });
            }

            let edge = EdgeView {
                source: src.node_id.clone(),
                target: dst.node_id.clone(),
                source_handle: src.handle.clone(),
                target_handle: dst.handle.clone(),
                label,
                branch: arrow.branch,
                content_type: arrow.content_type.clone(),
            };

            outgoing.get_mut(&src.node_id).unwrap().push(edge.clone());
            incoming.get_mut(&dst.node_id).unwrap().push(edge);
        }

        let (initial_levels, order) = kahn_levels(diagram, &incoming);
        for node in &diagram.nodes {
            if !order.contains(&node.id) {
                warnings.push(ViewWarning::UnreachableAtLevel0 {
                    node_id: node.id.clone(),
                });
            }
        }

        let mut nodes = HashMap::new();
        for node in &diagram.nodes {
            if registry.lookup(node.node_type.as_str()).is_none() {
                return Err(CoreError::InvalidDiagram(format!(
                    "no handler registered for node type '{}' (node {})",
                    node.node_type.as_str(),
                    node.id
                )));
            }
            let max_iterations = node.max_iterations();
            let person = node
                .person_id
                .as_ref()
                .and_then(|pid| persons.get(pid.as_str()))
                .map(|p| (*p).clone());
            nodes.insert(
                node.id.clone(),
                NodeView {
                    node: node.clone(),
                    incoming: incoming.remove(&node.id).unwrap_or_default(),
                    outgoing: outgoing.remove(&node.id).unwrap_or_default(),
                    person,
                    max_iterations,
                    state: RwLock::new(NodeRuntimeState::default()),
                },
            );
        }

        // full iteration order for diagnostics: levels in order, then any
        // node Kahn never reached (appended so nothing is silently dropped).
        let mut full_order = order.clone();
        for node in &diagram.nodes {
            if !full_order.contains(&node.id) {
                full_order.push(node.id.clone());
            }
        }

        Ok(ExecutionView {
            nodes,
            order: full_order,
            initial_levels,
            warnings,
        })
    }

    pub fn get(&self, id: &str) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    pub fn iter_in_order(&self) -> impl Iterator<Item = &NodeView> {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }
}

/// Kahn's algorithm leveling per §4.4 step 4: a person-job node's in-degree
/// counts only its `first`-handle incoming edges when it has any, letting a
/// loop-back node seed before its back-edge is satisfied.
fn kahn_levels(
    diagram: &Diagram,
    incoming: &HashMap<NodeId, Vec<EdgeView>>,
) -> (Vec<Vec<NodeId>>, Vec<NodeId>) {
    let node_by_id: HashMap<&str, &Node> =
        diagram.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    for node in &diagram.nodes {
        let edges = incoming.get(&node.id).cloned().unwrap_or_default();
        let degree = if node.node_type.is_person_job() {
            let first_count = edges.iter().filter(|e| e.target_handle == "first").count();
            if first_count > 0 {
                first_count
            } else {
                edges.len()
            }
        } else {
            edges.len()
        };
        in_degree.insert(node.id.clone(), degree);
    }

    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut levels = Vec::new();
    let mut order = Vec::new();
    let mut remaining = in_degree.clone();

    while !queue.is_empty() {
        let level: Vec<NodeId> = queue.drain(..).collect();
        for id in &level {
            order.push(id.clone());
        }
        let mut next = VecDeque::new();
        for id in &level {
            if let Some(view_node) = node_by_id.get(id.as_str()) {
                for arrow in &diagram.arrows {
                    let src = Endpoint::parse(&arrow.source);
                    let dst = Endpoint::parse(&arrow.target);
                    if src.node_id != view_node.id {
                        continue;
                    }
                    // person-job nodes whose degree only counted `first`
                    // edges must not be decremented by non-first edges.
                    let target = node_by_id.get(dst.node_id.as_str());
                    let counts_this_edge = target
                        .map(|t| {
                            if t.node_type.is_person_job() {
                                let edges = incoming.get(&t.id).cloned().unwrap_or_default();
                                let first_count =
                                    edges.iter().filter(|e| e.target_handle == "first").count();
                                if first_count > 0 {
                                    dst.handle == "first"
                                } else {
                                    true
                                }
                            } else {
                                true
                            }
                        })
                        .unwrap_or(true);
                    if !counts_this_edge {
                        continue;
                    }
                    if let Some(d) = remaining.get_mut(&dst.node_id) {
                        if *d > 0 {
                            *d -= 1;
                            if *d == 0 {
                                next.push_back(dst.node_id.clone());
                            }
                        }
                    }
                }
            }
        }
        levels.push(level);
        queue = next;
    }

    (levels, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Arrow, NodeType};
    use crate::registry::HandlerRegistry;
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
        ) -> Result<NodeOutput> {
            Ok(NodeOutput::new().with_value("default", json!(null)))
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
    fn linear_view_builds_levels() {
        let d = Diagram {
            id: None,
            nodes: vec![
                node("start", NodeType::Start),
                node("end", NodeType::Endpoint),
            ],
            arrows: vec![Arrow {
                source: "start".into(),
                target: "end".into(),
                label: None,
                branch: None,
                content_type: None,
            }],
            persons: vec![],
        };
        let view = ExecutionView::build(&d, &registry()).unwrap();
        assert_eq!(view.initial_levels.len(), 2);
        assert_eq!(view.initial_levels[0], vec!["start".to_string()]);
        assert_eq!(view.initial_levels[1], vec!["end".to_string()]);
        assert!(view.warnings.is_empty());
    }

    #[test]
    fn person_job_self_loop_seeds_on_first_edge_only() {
        let d = Diagram {
            id: None,
            nodes: vec![node("start", NodeType::Start), node("pj", NodeType::PersonJob)],
            arrows: vec![
                Arrow {
                    source: "start".into(),
                    target: "pj:first".into(),
                    label: None,
                    branch: None,
                    content_type: None,
                },
                Arrow {
                    source: "pj".into(),
                    target: "pj".into(),
                    label: None,
                    branch: None,
                    content_type: None,
                },
            ],
            persons: vec![],
        };
        let view = ExecutionView::build(&d, &registry()).unwrap();
        // pj has in-degree 1 counting only the `first` edge, so it is
        // reachable at level 1 despite also having a self-loop default edge.
        assert_eq!(view.initial_levels.len(), 2);
        assert_eq!(view.initial_levels[1], vec!["pj".to_string()]);
    }

    #[test]
    fn duplicate_label_is_a_warning_not_an_error() {
        let d = Diagram {
            id: None,
            nodes: vec![node("a", NodeType::Start), node("b", NodeType::Endpoint)],
            arrows: vec![
                Arrow {
                    source: "a".into(),
                    target: "b".into(),
                    label: Some("x".into()),
                    branch: None,
                    content_type: None,
                },
                Arrow {
                    source: "a".into(),
                    target: "b".into(),
                    label: Some("x".into()),
                    branch: None,
                    content_type: None,
                },
            ],
            persons: vec![],
        };
        let view = ExecutionView::build(&d, &registry()).unwrap();
        assert_eq!(view.warnings.len(), 1);
        assert!(matches!(
            view.warnings[0],
            ViewWarning::DuplicateLabel { .. }
        ));
    }

    #[test]
    fn build_is_idempotent() {
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
        let r = registry();
        let v1 = ExecutionView::build(&d, &r).unwrap();
        let v2 = ExecutionView::build(&d, &r).unwrap();
        assert_eq!(v1.order, v2.order);
        assert_eq!(v1.initial_levels, v2.initial_levels);
    }
}
