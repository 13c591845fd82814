//! Event Bus / Observers (C7): the lifecycle event stream and the
//! dispatcher that delivers it to registered observers in order.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::diagram::ExecutionId;
use crate::view::NodeOutput;

/// One entry in the public event stream (§6.1). `timestamp` is attached by
/// the scheduler at emission time, not carried by the variant itself, so a
/// single `chrono::Utc::now()` call source of truth lives in one place.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "execution_start")]
    ExecutionStart { execution_id: ExecutionId },
    #[serde(rename = "node_start")]
    NodeStart {
        node_id: String,
        node_type: String,
        execution_id: ExecutionId,
    },
    #[serde(rename = "node_complete")]
    NodeComplete {
        node_id: String,
        node_type: String,
        execution_id: ExecutionId,
        output: NodeOutput,
    },
    #[serde(rename = "node_error")]
    NodeError {
        node_id: String,
        node_type: String,
        execution_id: ExecutionId,
        error: String,
        kind: String,
    },
    #[serde(rename = "iteration_tick")]
    IterationTick {
        iteration: u32,
        executed_nodes: usize,
        endpoint_reached: bool,
    },
    #[serde(rename = "execution_complete")]
    ExecutionComplete {
        execution_id: ExecutionId,
        status: String,
    },
    #[serde(rename = "execution_error")]
    ExecutionError {
        execution_id: ExecutionId,
        status: String,
        error: String,
        kind: String,
    },
}

/// Hooks an observer may implement. All default to no-ops so an observer
/// only overrides what it cares about. Hooks return `()`, not `Result`: per
/// §4.7 an observer's own failure is logged by the dispatcher and never
/// propagated back into the run.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_execution_start(&self, _execution_id: &str) {}
    async fn on_execution_complete(&self, _execution_id: &str, _status: &str) {}
    async fn on_execution_error(&self, _execution_id: &str, _error: &str, _kind: &str) {}
    async fn on_node_start(&self, _node_id: &str, _node_type: &str) {}
    async fn on_node_complete(&self, _node_id: &str, _output: &NodeOutput) {}
    async fn on_node_error(&self, _node_id: &str, _kind: &str, _message: &str) {}
    async fn on_iteration_tick(&self, _iteration: u32, _executed: usize, _endpoint_reached: bool) {}
}

/// Dispatches one event to every registered observer, in registration
/// order. Observers cannot signal failure through this path by design; a
/// panic inside one is caught and logged so the run continues (§4.7).
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub async fn dispatch(&self, event: &Event) {
        for observer in &self.observers {
            let fut: Pin<Box<dyn Future<Output = ()> + Send + '_>> = match event {
                Event::ExecutionStart { execution_id } => {
                    observer.on_execution_start(execution_id).boxed()
                }
                Event::ExecutionComplete {
                    execution_id,
                    status,
                } => observer.on_execution_complete(execution_id, status).boxed(),
                Event::ExecutionError {
                    execution_id,
                    error,
                    kind,
                    ..
                } => observer
                    .on_execution_error(execution_id, error, kind)
                    .boxed(),
                Event::NodeStart {
                    node_id, node_type, ..
                } => observer.on_node_start(node_id, node_type).boxed(),
                Event::NodeComplete {
                    node_id, output, ..
                } => observer.on_node_complete(node_id, output).boxed(),
                Event::NodeError {
                    node_id,
                    error,
                    kind,
                    ..
                } => observer.on_node_error(node_id, kind, error).boxed(),
                Event::IterationTick {
                    iteration,
                    executed_nodes,
                    endpoint_reached,
                } => observer
                    .on_iteration_tick(*iteration, *executed_nodes, *endpoint_reached)
                    .boxed(),
            };

            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "observer panicked with a non-string payload".to_string());
                tracing::warn!(error = %message, "observer panicked during dispatch, run continues");
            }
        }
    }
}
