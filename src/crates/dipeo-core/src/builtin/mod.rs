//! Built-in node type handlers (§6.2): one [`crate::handler::Handler`] impl
//! per row of the handler contract table, each with its own property schema
//! registered against the Handler Registry so step 2 of §4.5 validates
//! against it before the handler ever runs.
//!
//! The core does not embed any provider behind these — every handler here
//! calls through a narrow trait in [`services_api`] that a call site binds
//! into the Service Registry under the matching key.

mod api_job;
mod code_job;
mod condition;
mod db;
mod endpoint;
mod notion;
mod person_job;
pub mod services_api;
mod start;
mod user_response;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::registry::HandlerRegistry;
use crate::services::ServiceHandle;

/// Downcasts a type-erased [`ServiceHandle`] back to the `Arc<dyn Trait>`
/// the handler expects, per the convention that a service is always bound
/// as `Arc::new(arc_of_trait_object) as ServiceHandle`.
pub(crate) fn resolve_typed<T: ?Sized + Send + Sync + 'static>(
    services: &HashMap<String, ServiceHandle>,
    node_id: &str,
    key: &str,
) -> Result<Arc<T>> {
    services
        .get(key)
        .and_then(|handle| handle.clone().downcast::<Arc<T>>().ok())
        .map(|boxed| (*boxed).clone())
        .ok_or_else(|| CoreError::MissingService {
            node_id: node_id.to_string(),
            service: key.to_string(),
        })
}

/// Registers every built-in node type's handler and property schema against
/// `registry`. A call site that needs a subset, or wants to override one
/// type, registers afterward — registration is idempotent per node type
/// outside of [`crate::registry::Environment::Production`].
pub fn register_builtin(registry: &mut HandlerRegistry) -> Result<()> {
    start::register(registry)?;
    condition::register(registry)?;
    person_job::register(registry)?;
    endpoint::register(registry)?;
    db::register(registry)?;
    code_job::register(registry, "job")?;
    code_job::register(registry, "code_job")?;
    api_job::register(registry)?;
    user_response::register(registry)?;
    notion::register(registry, "notion")?;
    notion::register(registry, "integrated_api")?;
    Ok(())
}
