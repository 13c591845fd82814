//! Execution Coordinator (C8): the public entry point that wires a
//! [`crate::diagram::Diagram`] to a run.
//!
//! ```text
//! build view -> build context -> emit execution_start
//!   -> run scheduler, streaming node/iteration events as they occur
//!   -> compute final_status from the scheduler's outcome
//!   -> emit execution_complete or execution_error
//! ```
//!
//! Observers never see raw scheduler internals, only the [`Event`] stream;
//! a state-persistence observer (see the sibling persistence crate) listens
//! on exactly this stream to checkpoint progress.

use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::diagram::Diagram;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus, Observer};
use crate::registry::HandlerRegistry;
use crate::scheduler::{self, CancellationToken, ExecutionOptions, Outcome};
use crate::services::ServiceRegistry;
use crate::view::ExecutionView;

/// Everything the Coordinator needs beyond the diagram and options: the
/// registries a call site builds once and reuses across many runs.
pub struct Engine {
    pub handlers: HandlerRegistry,
    pub services: Arc<ServiceRegistry>,
}

impl Engine {
    pub fn new(handlers: HandlerRegistry, services: Arc<ServiceRegistry>) -> Self {
        Self { handlers, services }
    }

    /// Runs `diagram` to completion, dispatching every lifecycle event to
    /// `event_bus` as it happens, and returns the final status string —
    /// always `"completed"` or `"failed"`, regardless of whether the run
    /// ended by quiescence, deadlock, cancellation, or timeout.
    ///
    /// `api_keys` and `variables` seed the per-run [`ExecutionContext`];
    /// `execution_id` should be unique per call (the caller owns id
    /// generation, matching how the reference coordinator takes an
    /// already-minted run id rather than generating one internally).
    pub async fn run(
        &self,
        diagram: &Diagram,
        execution_id: impl Into<String>,
        variables: Value,
        api_keys: HashMap<String, String>,
        event_bus: &EventBus,
        options: ExecutionOptions,
        cancellation: CancellationToken,
    ) -> Result<String> {
        let execution_id = execution_id.into();
        let view = ExecutionView::build(diagram, &self.handlers)?;
        for warning in &view.warnings {
            tracing::warn!(?warning, "diagram authoring warning");
        }

        let context = ExecutionContext::new(execution_id.clone(), diagram, variables, api_keys);

        event_bus
            .dispatch(&Event::ExecutionStart {
                execution_id: execution_id.clone(),
            })
            .await;
        tracing::info!(execution_id = %execution_id, "execution_start");

        let run_future = scheduler::run(
            &view,
            &context,
            &self.handlers,
            &self.services,
            event_bus,
            &options,
            cancellation.clone(),
        );

        // A run-wide deadline wraps the whole scheduler loop rather than
        // being polled inside it: dropping this future on elapse is itself
        // the cancellation, since nothing the scheduler awaits escapes onto
        // a detached task.
        let outcome = match options.timeout_seconds {
            Some(secs) => {
                match dipeo_runtime::async_utils::timeout::with_timeout(
                    std::time::Duration::from_secs(secs),
                    run_future.map(Ok::<_, std::convert::Infallible>),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_timed_out) => {
                        cancellation.cancel();
                        Outcome::Cancelled
                    }
                }
            }
            None => run_future.await,
        };

        // Only "completed"/"failed" ever appear on the wire (§4.9); deadlock
        // and cancellation terminate via `execution_error` instead of a
        // normal `execution_complete`, per §7's propagation rules. Hitting
        // the global iteration cap is not itself an error kind (only a
        // single node exceeding its own `max_iterations` is) — it is treated
        // as ordinary quiescence.
        match outcome {
            Outcome::Deadlock => {
                let err = CoreError::Deadlock;
                event_bus
                    .dispatch(&Event::ExecutionError {
                        execution_id: execution_id.clone(),
                        status: "failed".to_string(),
                        error: err.to_string(),
                        kind: err.kind().to_string(),
                    })
                    .await;
                tracing::error!(execution_id = %execution_id, "execution_error: deadlock");
                Ok("failed".to_string())
            }
            Outcome::Cancelled => {
                let err = CoreError::Cancelled;
                event_bus
                    .dispatch(&Event::ExecutionError {
                        execution_id: execution_id.clone(),
                        status: "failed".to_string(),
                        error: err.to_string(),
                        kind: err.kind().to_string(),
                    })
                    .await;
                tracing::error!(execution_id = %execution_id, "execution_error: cancelled");
                Ok("failed".to_string())
            }
            Outcome::Finished { any_node_failed } | Outcome::IterationCapReached { any_node_failed } => {
                let status = if any_node_failed { "failed" } else { "completed" };
                event_bus
                    .dispatch(&Event::ExecutionComplete {
                        execution_id: execution_id.clone(),
                        status: status.to_string(),
                    })
                    .await;
                tracing::info!(execution_id = %execution_id, status, "execution_complete");
                Ok(status.to_string())
            }
        }
    }

    pub fn register_observer(&self, event_bus: &mut EventBus, observer: Arc<dyn Observer>) {
        event_bus.register(observer);
    }
}
