//! In-memory [`StatePersistence`] implementation: a plain `Mutex`-guarded
//! map, good enough for single-process runs and tests. A file- or
//! database-backed implementation would live beside this one behind the
//! same trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, StateError};
use crate::traits::{ExecutionState, NodeStateEntry, StatePersistence};

#[derive(Default)]
pub struct InMemoryStatePersistence {
    executions: Mutex<HashMap<String, ExecutionState>>,
}

impl InMemoryStatePersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatePersistence for InMemoryStatePersistence {
    async fn create_execution(
        &self,
        execution_id: &str,
        diagram_id: Option<&str>,
        variables: Value,
    ) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        if executions.contains_key(execution_id) {
            return Err(StateError::AlreadyExists(execution_id.to_string()));
        }
        executions.insert(
            execution_id.to_string(),
            ExecutionState::new(execution_id, diagram_id.map(String::from), variables),
        );
        Ok(())
    }

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: &str,
        output: Option<Value>,
    ) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        let state = executions
            .get_mut(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.to_string()))?;
        state.node_states.insert(
            node_id.to_string(),
            NodeStateEntry {
                status: status.to_string(),
                output,
            },
        );
        state.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn update_status(&self, execution_id: &str, status: &str, error: Option<&str>) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        let state = executions
            .get_mut(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.to_string()))?;
        state.status = status.to_string();
        state.error = error.map(String::from);
        state.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_state(&self, execution_id: &str) -> Result<ExecutionState> {
        self.executions
            .lock()
            .unwrap()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(execution_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = InMemoryStatePersistence::new();
        store
            .create_execution("e1", Some("d1"), json!({"x": 1}))
            .await
            .unwrap();
        let state = store.get_state("e1").await.unwrap();
        assert_eq!(state.status, "running");
        assert_eq!(state.diagram_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryStatePersistence::new();
        store.create_execution("e1", None, json!({})).await.unwrap();
        let err = store.create_execution("e1", None, json!({})).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn update_node_status_then_get_reflects_it() {
        let store = InMemoryStatePersistence::new();
        store.create_execution("e1", None, json!({})).await.unwrap();
        store
            .update_node_status("e1", "n1", "completed", Some(json!({"default": 42})))
            .await
            .unwrap();
        let state = store.get_state("e1").await.unwrap();
        assert_eq!(state.node_states["n1"].status, "completed");
    }

    #[tokio::test]
    async fn update_status_on_missing_execution_errors() {
        let store = InMemoryStatePersistence::new();
        let err = store.update_status("missing", "failed", None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn final_status_and_error_are_recorded() {
        let store = InMemoryStatePersistence::new();
        store.create_execution("e1", None, json!({})).await.unwrap();
        store.update_status("e1", "failed", Some("boom")).await.unwrap();
        let state = store.get_state("e1").await.unwrap();
        assert_eq!(state.status, "failed");
        assert_eq!(state.error.as_deref(), Some("boom"));
    }
}
