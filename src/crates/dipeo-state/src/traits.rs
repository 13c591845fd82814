//! The persistence interface consumed by the core's state-persistence
//! observer (§6.4): a key-value-shaped view of one execution's progress,
//! decoupled from wherever it actually lives (memory, file, database).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// One node's last-known status within a persisted execution document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStateEntry {
    pub status: String,
    pub output: Option<Value>,
}

/// The full persisted document for one execution — what `get_state` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    pub diagram_id: Option<String>,
    pub variables: Value,
    pub status: String,
    pub node_states: HashMap<String, NodeStateEntry>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionState {
    pub fn new(execution_id: impl Into<String>, diagram_id: Option<String>, variables: Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            execution_id: execution_id.into(),
            diagram_id,
            variables,
            status: "running".to_string(),
            node_states: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Backing store for execution progress, written to as the run streams
/// events and read back by callers wanting to inspect or resume a run.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn create_execution(
        &self,
        execution_id: &str,
        diagram_id: Option<&str>,
        variables: Value,
    ) -> Result<()>;

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: &str,
        output: Option<Value>,
    ) -> Result<()>;

    async fn update_status(&self, execution_id: &str, status: &str, error: Option<&str>) -> Result<()>;

    async fn get_state(&self, execution_id: &str) -> Result<ExecutionState>;
}
