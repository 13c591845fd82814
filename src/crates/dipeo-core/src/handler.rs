//! The handler invocation contract (§6.2): what a node type implementation
//! actually looks like from the scheduler's point of view.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::context::ExecutionContextSnapshot;
use crate::error::Result;
use crate::services::ServiceHandle;
use crate::view::NodeOutput;

/// A node type's invocation function.
///
/// Implementors receive already-validated properties, a read-only context
/// snapshot, the inputs [`crate::input_collector`] gathered, and exactly the
/// services the handler declared via `requires_services`. A handler never
/// sees peer `NodeView`s and cannot mutate anything outside its own return
/// value.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(
        &self,
        props: &Value,
        context: &ExecutionContextSnapshot,
        inputs: &HashMap<String, Value>,
        services: &HashMap<String, ServiceHandle>,
    ) -> Result<NodeOutput>;
}
