//! The state-persistence observer (§3, "State-persistence observer"):
//! mirrors the core's event stream into a [`StatePersistence`] backend and
//! writes the final status on the terminal event.
//!
//! One instance is scoped to a single execution, created right before
//! `Engine::run` and registered on that run's `EventBus` — `on_node_complete`
//! is not passed an `execution_id`, so binding it at construction is what
//! makes per-node persistence possible at all.
//!
//! Persistence failures are logged, never propagated — an observer's own
//! failure must not affect the run it is watching (§4.7).

use async_trait::async_trait;
use std::sync::Arc;

use dipeo_core::{NodeOutput, Observer};

use crate::traits::StatePersistence;

pub struct StatePersistenceObserver {
    execution_id: String,
    store: Arc<dyn StatePersistence>,
}

impl StatePersistenceObserver {
    pub fn new(execution_id: impl Into<String>, store: Arc<dyn StatePersistence>) -> Self {
        Self {
            execution_id: execution_id.into(),
            store,
        }
    }
}

#[async_trait]
impl Observer for StatePersistenceObserver {
    async fn on_execution_start(&self, execution_id: &str) {
        if let Err(e) = self
            .store
            .create_execution(execution_id, None, serde_json::Value::Null)
            .await
        {
            tracing::warn!(execution_id, error = %e, "state observer failed to record execution_start");
        }
    }

    async fn on_execution_complete(&self, execution_id: &str, status: &str) {
        if let Err(e) = self.store.update_status(execution_id, status, None).await {
            tracing::warn!(execution_id, error = %e, "state observer failed to record execution_complete");
        }
    }

    async fn on_execution_error(&self, execution_id: &str, error: &str, _kind: &str) {
        if let Err(e) = self.store.update_status(execution_id, "failed", Some(error)).await {
            tracing::warn!(execution_id, error = %e, "state observer failed to record execution_error");
        }
    }

    async fn on_node_complete(&self, node_id: &str, output: &NodeOutput) {
        let status = output.status().unwrap_or("completed").to_string();
        let value = serde_json::to_value(&output.value).ok();
        if let Err(e) = self
            .store
            .update_node_status(&self.execution_id, node_id, &status, value)
            .await
        {
            tracing::warn!(
                execution_id = %self.execution_id,
                node_id,
                error = %e,
                "state observer failed to record node_complete"
            );
        }
    }

    async fn on_node_error(&self, node_id: &str, kind: &str, message: &str) {
        if let Err(e) = self
            .store
            .update_node_status(
                &self.execution_id,
                node_id,
                "failed",
                Some(serde_json::json!({ "error": message, "kind": kind })),
            )
            .await
        {
            tracing::warn!(
                execution_id = %self.execution_id,
                node_id,
                error = %e,
                "state observer failed to record node_error"
            );
        }
    }
}
