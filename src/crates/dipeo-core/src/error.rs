//! Error kinds emitted by the execution engine.
//!
//! Every variant here maps onto one of the `kind` tags carried by a
//! `node_error` or `execution_error` event. The enum is deliberately flat:
//! callers match on `kind()` to decide propagation (per-node vs. run-ending)
//! rather than downcasting a trait object.

use thiserror::Error;

/// Errors the scheduler, view builder, or input collector can raise.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node's property bag failed schema validation. Carries `field: msg` pairs.
    #[error("validation failed for node {node_id}: {}", .field_errors.iter().map(|(f, m)| format!("{f}: {m}")).collect::<Vec<_>>().join("; "))]
    Validation {
        node_id: String,
        field_errors: Vec<(String, String)>,
    },

    /// A handler declared a service dependency that did not resolve.
    #[error("node {node_id} requires service '{service}' which is not registered")]
    MissingService { node_id: String, service: String },

    /// A handler returned or raised a failure.
    #[error("handler for node {node_id} failed: {message}")]
    HandlerFailure { node_id: String, message: String },

    /// A node or the whole run exceeded its time budget.
    #[error("node {node_id:?} timed out after {elapsed_ms}ms")]
    Timeout {
        node_id: Option<String>,
        elapsed_ms: u64,
    },

    /// The run was cancelled before completion.
    #[error("execution cancelled")]
    Cancelled,

    /// No node is ready and none has ever completed.
    #[error("deadlock: no ready nodes and none completed")]
    Deadlock,

    /// A node reached its `max_iterations` cap (informational, not necessarily fatal).
    #[error("node {node_id} reached its iteration limit of {max_iterations}")]
    IterationLimit { node_id: String, max_iterations: u32 },

    /// An invariant the scheduler relies on was violated; indicates an engine bug.
    #[error("internal scheduler error: {0}")]
    Internal(String),

    /// The input diagram referenced an unknown node id, unregistered node type,
    /// or unresolved person — caught before a run ever starts.
    #[error("invalid diagram: {0}")]
    InvalidDiagram(String),
}

impl CoreError {
    /// The machine-readable `kind` tag carried on `node_error`/`execution_error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation",
            CoreError::MissingService { .. } => "missing_service",
            CoreError::HandlerFailure { .. } => "handler_failure",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::Deadlock => "deadlock",
            CoreError::IterationLimit { .. } => "iteration_limit",
            CoreError::Internal(_) => "internal",
            CoreError::InvalidDiagram(_) => "invalid_diagram",
        }
    }

    /// Whether this error terminates the whole run (`execution_error`) rather
    /// than just the node that raised it (`node_error`).
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Deadlock | CoreError::Internal(_) | CoreError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_formats_field_errors() {
        let err = CoreError::Validation {
            node_id: "n1".into(),
            field_errors: vec![("url".into(), "missing".into())],
        };
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("url: missing"));
    }

    #[test]
    fn run_fatal_kinds() {
        assert!(CoreError::Deadlock.is_run_fatal());
        assert!(CoreError::Internal("bug".into()).is_run_fatal());
        assert!(CoreError::Cancelled.is_run_fatal());
        assert!(!CoreError::HandlerFailure {
            node_id: "n1".into(),
            message: "boom".into()
        }
        .is_run_fatal());
    }
}
