//! Ambient runtime support for the DiPeO execution engine.
//!
//! This crate provides the cross-cutting concerns the scheduler, coordinator
//! and handler contract lean on, but that are not themselves part of the
//! diagram execution semantics:
//!
//! # Modules
//!
//! - `config` - Configuration loading for [`crate::ExecutionRuntimeConfig`] and friends, environment variable driven
//! - `error` - Error context and chain formatting helpers
//! - `async_utils` - Retry policies and timeout wrappers used around handler invocation and run-wide timeouts
//! - `validation` - Fluent validation API, used to build property-schema field errors
//! - `serialization` - Stable JSON serialization and hashing utilities
//! - `rate_limit` - Token bucket and sliding window rate limiters
//! - `logging` - Structured logging helpers built on `tracing`

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod serialization;
pub mod validation;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in ambient runtime utilities (config, validation, I/O).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// General error with message
    #[error("runtime error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ambient runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Process-wide defaults for running diagram executions, loadable from
/// the environment (`DIPEO_*`) and overridable per-call by `ExecutionOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRuntimeConfig {
    /// Emit debug-level tracing for every scheduler batch.
    pub verbose: bool,
    /// Directory state-persistence observers may spill large outputs to.
    pub output_dir: Option<String>,
}

impl Default for ExecutionRuntimeConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            output_dir: None,
        }
    }
}

impl ExecutionRuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
