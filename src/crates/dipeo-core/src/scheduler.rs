//! Scheduler (C5): the unified run loop.
//!
//! ```text
//! init completed={}, endpoint_reached=false, iter=0
//! loop:
//!   if endpoint_reached or iter >= MAX_GLOBAL_ITERATIONS: break
//!   ready = [n | ready(n)]
//!   if ready empty:
//!     if completed empty: fail deadlock
//!     else: break                      # quiescence
//!   run ready concurrently, bounded by MAX_PARALLEL
//!   iter += 1; emit iteration_tick
//! ```
//!
//! There used to be two parallel scheduling strategies in the system this
//! was distilled from — a topological-levels-only pass and a view-based
//! iterative engine. This is the single collapsed run loop; the Kahn
//! leveling in [`crate::view`] is a diagnostic hint only, never load-bearing
//! for correctness.

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::context::ExecutionContext;
use crate::error::CoreError;
use crate::events::{Event, EventBus};
use crate::handler::Handler;
use crate::input_collector::collect_inputs;
use crate::registry::HandlerRegistry;
use crate::services::ServiceRegistry;
use crate::view::{ExecutionView, NodeOutput, NodeView};

pub const DEFAULT_MAX_GLOBAL_ITERATIONS: u32 = 100;
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// Per-run knobs, §4.8.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub variables: Value,
    pub max_iterations: u32,
    pub max_parallel_nodes: usize,
    pub timeout_seconds: Option<u64>,
    pub debug_mode: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            variables: Value::Null,
            max_iterations: DEFAULT_MAX_GLOBAL_ITERATIONS,
            max_parallel_nodes: DEFAULT_MAX_PARALLEL,
            timeout_seconds: None,
            debug_mode: false,
        }
    }
}

/// A single cooperative cancellation signal, observed at step boundaries.
/// Cheap to clone; all clones share the same flag.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the run loop ended, used by the Coordinator to compute `final_status`
/// and pick between `execution_complete`/`execution_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Endpoint reached or quiescence with at least one completed node.
    Finished { any_node_failed: bool },
    Deadlock,
    Cancelled,
    IterationCapReached { any_node_failed: bool },
}

struct NodeDependencies<'a> {
    producers: Vec<&'a str>,
}

fn node_dependencies<'a>(node: &'a NodeView) -> NodeDependencies<'a> {
    let is_first_only =
        node.node_type().is_person_job() && node.exec_count() == 0 && node.first_edges().next().is_some();
    let producers = if is_first_only {
        node.first_edges().map(|e| e.source.as_str()).collect()
    } else {
        node.incoming.iter().map(|e| e.source.as_str()).collect()
    };
    NodeDependencies { producers }
}

/// `n` is ready iff not completed, has remaining iterations, and its
/// dependency predicate (§4.5) holds.
fn is_ready(view: &ExecutionView, node: &NodeView) -> bool {
    if node.completed() || node.exec_count() >= node.max_iterations {
        return false;
    }
    if node.node_type().is_start() {
        return true;
    }

    let deps = node_dependencies(node);
    let is_person_job_seeding =
        node.node_type().is_person_job() && node.exec_count() == 0 && node.first_edges().next().is_some();

    if is_person_job_seeding {
        // Satisfied once *any* first-handle source has output.
        deps.producers
            .iter()
            .any(|id| view.get(id).map(|n| n.has_output()).unwrap_or(false))
    } else if deps.producers.is_empty() {
        // No incoming edges at all (orphan beyond start) — runs once
        // dependencies are vacuously satisfied.
        true
    } else {
        deps.producers
            .iter()
            .all(|id| view.get(id).map(|n| n.has_output()).unwrap_or(false))
    }
}

/// Runs one node's step (§4.5 per-node execution step) and emits its
/// `node_start`/`node_complete`/`node_error` events.
async fn run_node_step(
    view: &ExecutionView,
    node_id: &str,
    context: &ExecutionContext,
    registry: &HandlerRegistry,
    services: &ServiceRegistry,
    event_bus: &EventBus,
    execution_id: &str,
) {
    let node = view.get(node_id).expect("node in ready set exists in view");
    let node_type = node.node_type().as_str().to_string();

    event_bus
        .dispatch(&Event::NodeStart {
            node_id: node_id.to_string(),
            node_type: node_type.clone(),
            execution_id: execution_id.to_string(),
        })
        .await;
    tracing::info!(node_id, node_type = %node_type, "node_start");

    context.set_current_node(Some(node_id.to_string()));

    if let Err(field_errors) = registry.validate_properties(&node_type, &node.node.properties) {
        let err = CoreError::Validation {
            node_id: node_id.to_string(),
            field_errors,
        };
        emit_node_error(view, node, &err, event_bus, execution_id, &node_type).await;
        return;
    }

    let inputs = collect_inputs(view, node);

    let mut resolved_services: HashMap<String, crate::services::ServiceHandle> = HashMap::new();
    for name in registry.requires_services(&node_type) {
        match services.resolve(name) {
            Ok(handle) => {
                resolved_services.insert(name.clone(), handle);
            }
            Err(_) => {
                let err = CoreError::MissingService {
                    node_id: node_id.to_string(),
                    service: name.clone(),
                };
                emit_node_error(view, node, &err, event_bus, execution_id, &node_type).await;
                return;
            }
        }
    }
    // Optional services (e.g. person_job's conversation store) are resolved
    // best-effort: absence is not an error, the handler just sees the key
    // missing from its services map and treats that capability as unavailable.
    for name in registry.optional_services_for(&node_type) {
        if let Ok(handle) = services.resolve(name) {
            resolved_services.insert(name.clone(), handle);
        }
    }

    let handler: &dyn Handler = registry
        .lookup(&node_type)
        .expect("view construction already rejected unregistered node types");
    let snapshot = context.snapshot();

    match handler
        .invoke(&node.node.properties, &snapshot, &inputs, &resolved_services)
        .await
    {
        Ok(output) => {
            if let Some(usage) = output.metadata.get("tokenUsage") {
                if let Ok(usage) = serde_json::from_value::<crate::memory::TokenUsage>(usage.clone()) {
                    context.add_token_usage(&usage);
                }
            }
            node.record_output(output.clone());
            context.set_node_output(node_id.to_string(), output.clone());
            context.increment_exec_count(node_id);

            event_bus
                .dispatch(&Event::NodeComplete {
                    node_id: node_id.to_string(),
                    node_type: node_type.clone(),
                    execution_id: execution_id.to_string(),
                    output,
                })
                .await;
            tracing::info!(node_id, node_type = %node_type, "node_complete");
        }
        Err(err) => {
            emit_node_error(view, node, &err, event_bus, execution_id, &node_type).await;
        }
    }
}

async fn emit_node_error(
    view: &ExecutionView,
    node: &NodeView,
    err: &CoreError,
    event_bus: &EventBus,
    execution_id: &str,
    node_type: &str,
) {
    let mut failed_output = NodeOutput::new();
    failed_output
        .metadata
        .insert("status".into(), Value::String("failed".into()));
    failed_output
        .metadata
        .insert("error".into(), Value::String(err.to_string()));
    node.record_output(failed_output);
    let _ = view; // kept for symmetry / future per-node diagnostics

    event_bus
        .dispatch(&Event::NodeError {
            node_id: node.id().to_string(),
            node_type: node_type.to_string(),
            execution_id: execution_id.to_string(),
            error: err.to_string(),
            kind: err.kind().to_string(),
        })
        .await;
    tracing::warn!(node_id = node.id(), kind = err.kind(), "node_error");
}

/// Re-arms every condition node whose output a just-finished node consumed,
/// provided the condition's own producer still has remaining iterations
/// (§4.5's one documented exception to "output set once per step").
fn rearm_consumed_conditions(view: &ExecutionView, just_ran: &[String]) {
    for node_id in just_ran {
        let Some(node) = view.get(node_id) else { continue };
        for edge in &node.incoming {
            let Some(source) = view.get(&edge.source) else { continue };
            if !source.node_type().is_condition() {
                continue;
            }
            let producer_has_more = source
                .incoming
                .iter()
                .filter_map(|e| view.get(&e.source))
                .any(|p| !p.completed());
            if producer_has_more {
                source.rearm();
            }
        }
    }
}

/// Runs the scheduler loop to completion against an already-built view.
pub async fn run(
    view: &ExecutionView,
    context: &ExecutionContext,
    registry: &HandlerRegistry,
    services: &ServiceRegistry,
    event_bus: &EventBus,
    options: &ExecutionOptions,
    cancellation: CancellationToken,
) -> Outcome {
    let semaphore = Arc::new(Semaphore::new(options.max_parallel_nodes.max(1)));
    let mut completed_count = 0usize;
    let mut endpoint_reached = false;
    let mut iter = 0u32;
    let mut any_node_failed = false;

    // A run-wide timeout is applied by the caller wrapping this whole call in
    // `dipeo_runtime::async_utils::timeout::with_timeout` (the coordinator
    // does this) — dropping this future on timeout is itself the cancellation,
    // since no work here escapes onto a detached task. This loop only reacts
    // to explicit `CancellationToken` signals.
    loop {
        if endpoint_reached {
            return Outcome::Finished { any_node_failed };
        }
        if iter >= options.max_iterations {
            return Outcome::IterationCapReached { any_node_failed };
        }
        if cancellation.is_cancelled() {
            return Outcome::Cancelled;
        }

        let ready: Vec<String> = view
            .iter_in_order()
            .filter(|n| is_ready(view, n))
            .map(|n| n.id().to_string())
            .collect();

        if ready.is_empty() {
            return if completed_count == 0 {
                Outcome::Deadlock
            } else {
                Outcome::Finished { any_node_failed }
            };
        }

        // Each ready node acquires its own permit lazily, inside the future
        // `for_each_concurrent` polls, rather than all up front in this loop —
        // acquiring `ready.len()` permits synchronously before any step ever
        // runs would deadlock as soon as a ready-set outgrew the semaphore's
        // capacity, since nothing would yet be in flight to release one.
        futures::stream::iter(ready.iter())
            .for_each_concurrent(Some(options.max_parallel_nodes.max(1)), |node_id| {
                let semaphore = semaphore.clone();
                let cancellation = cancellation.clone();
                async move {
                    if cancellation.is_cancelled() {
                        return;
                    }
                    let permit = semaphore.acquire_owned().await.unwrap();
                    run_node_step(
                        view,
                        node_id,
                        context,
                        registry,
                        services,
                        event_bus,
                        &context.execution_id,
                    )
                    .await;
                    drop(permit);
                }
            })
            .await;

        if cancellation.is_cancelled() {
            return Outcome::Cancelled;
        }

        rearm_consumed_conditions(view, &ready);

        for node_id in &ready {
            let node = view.get(node_id).unwrap();
            if node.node_type().is_endpoint() {
                endpoint_reached = true;
            }
            if let Some(output) = node.output() {
                if output.status() == Some("failed") {
                    any_node_failed = true;
                }
            }
            if node.completed() {
                completed_count += 1;
            }
        }

        iter += 1;
        event_bus
            .dispatch(&Event::IterationTick {
                iteration: iter,
                executed_nodes: completed_count,
                endpoint_reached,
            })
            .await;
        tracing::debug!(iter, completed_count, endpoint_reached, "iteration_tick");
    }
}
