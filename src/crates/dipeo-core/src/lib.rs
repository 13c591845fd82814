//! Diagram execution engine core.
//!
//! A diagram is a directed graph of typed nodes wired by labeled arrows
//! ([`diagram`]). Running one means: build an [`view::ExecutionView`] against
//! a [`registry::HandlerRegistry`], then drive [`scheduler::run`] (or the
//! [`coordinator::Engine`] wrapper, which also emits lifecycle events and
//! computes a final status) until the view's endpoints are reached, the
//! graph quiesces, or it deadlocks.
//!
//! Handlers (§6.2) read from a [`context::ExecutionContext`] snapshot, the
//! inputs [`input_collector::collect_inputs`] gathered for them, and the
//! services they declared via [`services::ServiceRegistry`]. LLM-backed
//! handlers additionally read and write through [`memory::ConversationStore`].

pub mod builtin;
pub mod context;
pub mod coordinator;
pub mod diagram;
pub mod error;
pub mod events;
pub mod handler;
pub mod input_collector;
pub mod memory;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod view;

pub use context::{ExecutionContext, ExecutionContextSnapshot};
pub use coordinator::Engine;
pub use diagram::{Arrow, Diagram, Endpoint, ExecutionId, Node, NodeId, NodeType, Person, PersonId};
pub use error::{CoreError, Result};
pub use events::{Event, EventBus, Observer};
pub use handler::Handler;
pub use memory::{ConversationStore, TokenUsage};
pub use registry::{Environment, HandlerDefinition, HandlerRegistry};
pub use scheduler::{CancellationToken, ExecutionOptions, Outcome};
pub use services::{RegisterOptions, ServiceHandle, ServiceRegistry};
pub use view::{EdgeView, ExecutionView, NodeOutput, NodeView, ViewWarning};
