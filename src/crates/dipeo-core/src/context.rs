//! Per-run execution context (§3): the state a Coordinator builds once per
//! run and owns exclusively, and the read-only snapshot handlers receive.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::diagram::{Diagram, ExecutionId, NodeId, Person, PersonId};
use crate::memory::TokenUsage;
use crate::view::NodeOutput;

/// Owned, mutable per-run state. The Coordinator is the only writer; reads
/// go out to handlers through [`ExecutionContextSnapshot`].
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub diagram_id: Option<String>,
    pub variables: Value,
    pub api_keys: HashMap<String, String>,
    pub persons: HashMap<PersonId, Person>,
    node_outputs: RwLock<HashMap<NodeId, NodeOutput>>,
    exec_counts: RwLock<HashMap<NodeId, u32>>,
    current_node_id: RwLock<Option<NodeId>>,
    token_accumulator: RwLock<TokenUsage>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<ExecutionId>,
        diagram: &Diagram,
        variables: Value,
        api_keys: HashMap<String, String>,
    ) -> Self {
        let persons = diagram
            .persons
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        Self {
            execution_id: execution_id.into(),
            diagram_id: diagram.id.clone(),
            variables,
            api_keys,
            persons,
            node_outputs: RwLock::new(HashMap::new()),
            exec_counts: RwLock::new(HashMap::new()),
            current_node_id: RwLock::new(None),
            token_accumulator: RwLock::new(TokenUsage::default()),
        }
    }

    pub fn set_current_node(&self, node_id: Option<NodeId>) {
        *self.current_node_id.write().unwrap() = node_id;
    }

    pub fn get_node_output(&self, node_id: &str) -> Option<NodeOutput> {
        self.node_outputs.read().unwrap().get(node_id).cloned()
    }

    pub fn set_node_output(&self, node_id: impl Into<NodeId>, output: NodeOutput) {
        self.node_outputs
            .write()
            .unwrap()
            .insert(node_id.into(), output);
    }

    pub fn increment_exec_count(&self, node_id: &str) -> u32 {
        let mut counts = self.exec_counts.write().unwrap();
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn exec_count(&self, node_id: &str) -> u32 {
        self.exec_counts
            .read()
            .unwrap()
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn get_api_key(&self, id: &str) -> Option<&String> {
        self.api_keys.get(id)
    }

    /// Folds one node's `tokenUsage` metadata into the running per-run
    /// totals, mirroring how the reference execution context accumulates
    /// token counts as each node finishes rather than rescanning history.
    pub fn add_token_usage(&self, usage: &TokenUsage) {
        self.token_accumulator.write().unwrap().add(usage);
    }

    pub fn total_token_usage(&self) -> TokenUsage {
        *self.token_accumulator.read().unwrap()
    }

    pub fn snapshot(&self) -> ExecutionContextSnapshot {
        ExecutionContextSnapshot {
            execution_id: self.execution_id.clone(),
            current_node_id: self.current_node_id.read().unwrap().clone(),
            variables: self.variables.clone(),
            node_outputs: self.node_outputs.read().unwrap().clone(),
            exec_counts: self.exec_counts.read().unwrap().clone(),
            api_keys: self.api_keys.clone(),
            persons: self.persons.clone(),
        }
    }
}

/// Read-only view of [`ExecutionContext`] passed to handlers — a frozen
/// copy taken right before invocation, so a handler cannot observe another
/// node's write mid-batch.
#[derive(Debug, Clone)]
pub struct ExecutionContextSnapshot {
    pub execution_id: ExecutionId,
    pub current_node_id: Option<NodeId>,
    pub variables: Value,
    pub node_outputs: HashMap<NodeId, NodeOutput>,
    pub exec_counts: HashMap<NodeId, u32>,
    pub api_keys: HashMap<String, String>,
    pub persons: HashMap<PersonId, Person>,
}
