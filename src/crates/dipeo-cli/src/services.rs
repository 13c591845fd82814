//! Default service bindings for the `run` subcommand: real implementations
//! for the capabilities a local CLI run can reasonably provide on its own
//! (file I/O, HTTP, subprocess code execution, a stdin prompt), plus clearly
//! unconfigured stubs for the two that need outside credentials (an LLM
//! provider, a Notion-style integration) — a library caller wires those in
//! through the same `ServiceRegistry` API rather than this binary guessing
//! at a default.

use async_trait::async_trait;
use dipeo_core::builtin::services_api::{
    CodeRunner, FileStore, HttpClient, InteractiveResponder, LlmClient, LlmRequest, LlmResponse,
    ProviderClient,
};
use dipeo_core::error::{CoreError, Result};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Reads/writes files relative to a fixed root directory, so a diagram's
/// `source_details`/`file_name` can't escape the working directory the CLI
/// was invoked from.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|e| CoreError::HandlerFailure {
                node_id: "db".to_string(),
                message: format!("reading '{path}': {e}"),
            })
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(full, content)
            .await
            .map_err(|e| CoreError::HandlerFailure {
                node_id: "db".to_string(),
                message: format!("writing '{path}': {e}"),
            })
    }

    async fn append(&self, path: &str, content: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(full)
            .await
            .map_err(|e| CoreError::HandlerFailure {
                node_id: "db".to_string(),
                message: format!("opening '{path}' for append: {e}"),
            })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| CoreError::HandlerFailure {
                node_id: "db".to_string(),
                message: format!("appending to '{path}': {e}"),
            })
    }
}

/// Runs `code` as a one-shot subprocess, piping `inputs` in as JSON on stdin
/// and parsing stdout as JSON (falling back to the raw string on failure).
pub struct SubprocessCodeRunner;

impl SubprocessCodeRunner {
    fn interpreter(language: &str) -> Option<(&'static str, &'static [&'static str])> {
        match language {
            "python" => Some(("python3", &["-c"])),
            "javascript" => Some(("node", &["-e"])),
            "bash" => Some(("bash", &["-c"])),
            _ => None,
        }
    }
}

#[async_trait]
impl CodeRunner for SubprocessCodeRunner {
    async fn run(&self, language: &str, code: &str, inputs: &Value) -> Result<Value> {
        let (program, flags) = Self::interpreter(language).ok_or_else(|| CoreError::HandlerFailure {
            node_id: "code_job".to_string(),
            message: format!("no interpreter configured for language '{language}'"),
        })?;

        let mut command = Command::new(program);
        command.args(flags).arg(code);
        command.env("DIPEO_INPUTS", inputs.to_string());
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let output = command.output().await.map_err(|e| CoreError::HandlerFailure {
            node_id: "code_job".to_string(),
            message: format!("spawning '{program}': {e}"),
        })?;

        if !output.status.success() {
            return Err(CoreError::HandlerFailure {
                node_id: "code_job".to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
    }
}

/// A thin `reqwest`-backed client, one request per `api_job` invocation.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &Value,
        body: Option<&Value>,
    ) -> Result<Value> {
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| {
            CoreError::HandlerFailure {
                node_id: "api_job".to_string(),
                message: format!("invalid HTTP method '{method}': {e}"),
            }
        })?;

        let mut request = self.client.request(method, url);
        if let Some(map) = headers.as_object() {
            for (key, value) in map {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| CoreError::HandlerFailure {
            node_id: "api_job".to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(CoreError::HandlerFailure {
                node_id: "api_job".to_string(),
                message: format!("{status}: {parsed}"),
            });
        }
        Ok(parsed)
    }
}

/// Prompts on stdout and reads one line from stdin, bounded by `timeout_seconds`.
pub struct StdinResponder;

#[async_trait]
impl InteractiveResponder for StdinResponder {
    async fn ask(&self, prompt: &str, timeout_seconds: Option<u64>) -> Result<String> {
        println!("{prompt}");
        let read = async {
            let mut line = String::new();
            let mut reader = BufReader::new(tokio::io::stdin());
            reader
                .read_line(&mut line)
                .await
                .map_err(|e| CoreError::HandlerFailure {
                    node_id: "user_response".to_string(),
                    message: e.to_string(),
                })?;
            Ok(line.trim_end().to_string())
        };
        match timeout_seconds {
            Some(secs) => tokio::time::timeout(std::time::Duration::from_secs(secs), read)
                .await
                .map_err(|_| CoreError::Timeout {
                    node_id: Some("user_response".to_string()),
                    elapsed_ms: secs * 1000,
                })?,
            None => read.await,
        }
    }
}

/// No LLM provider is wired into this binary by default — the core never
/// embeds one (§6.2), and picking a concrete provider/credential source is a
/// deployment decision, not something a reference CLI should guess at.
/// A caller of the library binds their own [`LlmClient`] under `"llm"`.
pub struct UnconfiguredLlmClient;

#[async_trait]
impl LlmClient for UnconfiguredLlmClient {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(CoreError::HandlerFailure {
            node_id: "person_job".to_string(),
            message: "no LLM provider configured; bind a LlmClient under \"llm\" before running \
                      diagrams with person_job nodes"
                .to_string(),
        })
    }
}

/// Same reasoning as [`UnconfiguredLlmClient`]: `notion`/`integrated_api`
/// nodes need a real provider SDK the core has no business knowing about.
pub struct UnconfiguredProviderClient;

#[async_trait]
impl ProviderClient for UnconfiguredProviderClient {
    async fn call(
        &self,
        provider: &str,
        _operation: &str,
        _resource_id: Option<&str>,
        _config: &Value,
    ) -> Result<Value> {
        Err(CoreError::HandlerFailure {
            node_id: "notion".to_string(),
            message: format!(
                "no provider client configured for '{provider}'; bind a ProviderClient under \
                 \"provider_client\" before running diagrams with integrated_api nodes"
            ),
        })
    }
}
