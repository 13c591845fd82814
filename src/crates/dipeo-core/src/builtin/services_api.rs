//! Trait boundaries the built-in handlers (§6.2) call through. The core
//! never implements these — it only downcasts whatever is bound under the
//! matching key in the Service Registry. A call site wires in a real LLM
//! client, file store, sandboxed code runner, HTTP client, interactive
//! prompt responder, or provider client as it sees fit.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::memory::TokenUsage;

/// Bound under `"llm"`. One `complete` call per `person_job` invocation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

pub struct LlmRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<LlmMessage>,
}

pub struct LlmMessage {
    pub role: &'static str,
    pub content: String,
}

pub struct LlmResponse {
    pub content: String,
    pub tokens: TokenUsage,
}

/// Bound under `"file_store"`. Backs `db` nodes.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;
    async fn write(&self, path: &str, content: &str) -> Result<()>;
    async fn append(&self, path: &str, content: &str) -> Result<()>;
}

/// Bound under `"code_runner"`. Backs `job`/`code_job` nodes.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, language: &str, code: &str, inputs: &Value) -> Result<Value>;
}

/// Bound under `"http_client"`. Backs `api_job` nodes.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &Value,
        body: Option<&Value>,
    ) -> Result<Value>;
}

/// Bound under `"interactive_responder"`. Backs `user_response` nodes.
#[async_trait]
pub trait InteractiveResponder: Send + Sync {
    async fn ask(&self, prompt: &str, timeout_seconds: Option<u64>) -> Result<String>;
}

/// Bound under `"provider_client"`. Backs `notion`/`integrated_api` nodes;
/// the core has no opinion on what `provider` names mean.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(
        &self,
        provider: &str,
        operation: &str,
        resource_id: Option<&str>,
        config: &Value,
    ) -> Result<Value>;
}
