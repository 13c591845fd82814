//! Thin binary entry point over the diagram execution engine: load a
//! diagram file, validate or run it, print results to stdout.
//!
//! Project scaffolding (`init`, `new`, templates) is deliberately not here —
//! this binary only exercises the library's own public API.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dipeo_core::{
    CancellationToken, ConversationStore, Diagram, Engine, Environment, EventBus, ExecutionOptions,
    HandlerRegistry, RegisterOptions, ServiceRegistry,
};

use dipeo_state::StatePersistence;

mod services;

use services::{
    LocalFileStore, ReqwestHttpClient, StdinResponder, SubprocessCodeRunner, UnconfiguredLlmClient,
    UnconfiguredProviderClient,
};

#[derive(Parser)]
#[command(name = "dipeo")]
#[command(about = "DiPeO diagram execution engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a diagram and build its execution view, reporting warnings
    Validate {
        /// Path to a diagram JSON file
        file: PathBuf,
    },

    /// Validate plus print a node/edge/level summary
    Check {
        /// Path to a diagram JSON file
        file: PathBuf,
    },

    /// Run a diagram to completion, printing each lifecycle event
    Run {
        /// Path to a diagram JSON file
        file: PathBuf,

        /// Runtime input variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,
    },
}

fn load_diagram(file: &PathBuf) -> anyhow::Result<Diagram> {
    let content = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&content)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => validate(&file)?,
        Commands::Check { file } => check(&file)?,
        Commands::Run { file, input } => run(&file, input.as_deref()).await?,
    }

    Ok(())
}

fn validate(file: &PathBuf) -> anyhow::Result<()> {
    let diagram = load_diagram(file)?;
    let registry = cli_registry(&diagram)?;
    let view = dipeo_core::ExecutionView::build(&diagram, &registry)?;

    println!("diagram is valid");
    println!("  nodes: {}", diagram.nodes.len());
    if view.warnings.is_empty() {
        println!("  warnings: none");
    } else {
        println!("  warnings:");
        for warning in &view.warnings {
            println!("    - {warning:?}");
        }
    }
    Ok(())
}

fn check(file: &PathBuf) -> anyhow::Result<()> {
    let diagram = load_diagram(file)?;
    let registry = cli_registry(&diagram)?;
    let view = dipeo_core::ExecutionView::build(&diagram, &registry)?;

    println!("diagram structure");
    println!("  nodes: {}", diagram.nodes.len());
    println!("  arrows: {}", diagram.arrows.len());
    println!("  levels: {}", view.initial_levels.len());
    for (i, level) in view.initial_levels.iter().enumerate() {
        println!("    level {i}: {}", level.join(", "));
    }
    if !view.warnings.is_empty() {
        println!("  warnings:");
        for warning in &view.warnings {
            println!("    - {warning:?}");
        }
    }
    Ok(())
}

async fn run(file: &PathBuf, input: Option<&str>) -> anyhow::Result<()> {
    let diagram = load_diagram(file)?;
    let variables = match input {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::Value::Null,
    };

    let handlers = cli_registry(&diagram)?;
    let services = Arc::new(ServiceRegistry::new(Environment::Development));
    bind_default_services(&services)?;
    let engine = Engine::new(handlers, services);

    struct StdoutObserver;
    #[async_trait::async_trait]
    impl dipeo_core::Observer for StdoutObserver {
        async fn on_execution_start(&self, execution_id: &str) {
            println!("execution_start {execution_id}");
        }
        async fn on_node_start(&self, node_id: &str, node_type: &str) {
            println!("node_start {node_id} ({node_type})");
        }
        async fn on_node_complete(&self, node_id: &str, output: &dipeo_core::NodeOutput) {
            println!("node_complete {node_id}: {:?}", output.value);
        }
        async fn on_node_error(&self, node_id: &str, kind: &str, message: &str) {
            println!("node_error {node_id} [{kind}]: {message}");
        }
        async fn on_execution_complete(&self, execution_id: &str, status: &str) {
            println!("execution_complete {execution_id}: {status}");
        }
        async fn on_execution_error(&self, execution_id: &str, error: &str, kind: &str) {
            println!("execution_error {execution_id} [{kind}]: {error}");
        }
    }

    let mut bus = EventBus::new();
    bus.register(Arc::new(StdoutObserver));

    let execution_id = uuid::Uuid::new_v4().to_string();
    let state_store = Arc::new(dipeo_state::InMemoryStatePersistence::new());
    bus.register(Arc::new(dipeo_state::StatePersistenceObserver::new(
        execution_id.clone(),
        state_store.clone(),
    )));

    let status = engine
        .run(
            &diagram,
            execution_id.clone(),
            variables,
            HashMap::new(),
            &bus,
            ExecutionOptions::default(),
            CancellationToken::new(),
        )
        .await?;

    println!("final status: {status}");
    if let Ok(state) = state_store.get_state(&execution_id).await {
        println!("persisted node states: {}", state.node_states.len());
    }
    Ok(())
}

/// Binds every built-in node type (§6.2) plus a no-op fallback for any node
/// type a diagram uses that the contract table doesn't cover, so
/// `validate`/`check`/`run` work on diagrams that lean on custom node types.
fn cli_registry(diagram: &Diagram) -> anyhow::Result<HandlerRegistry> {
    use dipeo_core::{Handler, HandlerDefinition, NodeOutput};

    struct StubHandler;
    #[async_trait::async_trait]
    impl Handler for StubHandler {
        async fn invoke(
            &self,
            _props: &serde_json::Value,
            _ctx: &dipeo_core::ExecutionContextSnapshot,
            inputs: &HashMap<String, serde_json::Value>,
            _services: &HashMap<String, dipeo_core::ServiceHandle>,
        ) -> dipeo_core::Result<NodeOutput> {
            let value = inputs.get("default").cloned().unwrap_or(serde_json::Value::Null);
            Ok(NodeOutput::new().with_value("default", value))
        }
    }

    let mut registry = HandlerRegistry::new();
    dipeo_core::builtin::register_builtin(&mut registry)?;

    let mut seen = std::collections::HashSet::new();
    for node in &diagram.nodes {
        let type_name = node.node_type.as_str().to_string();
        if registry.lookup(&type_name).is_none() && seen.insert(type_name.clone()) {
            registry.register(HandlerDefinition {
                node_type: type_name,
                requires_services: vec![],
                optional_services: vec![],
                handler: Arc::new(StubHandler),
            })?;
        }
    }
    Ok(registry)
}

/// Binds the capabilities a local CLI run can provide on its own. `llm` and
/// `provider_client` are bound to clear-error stubs rather than a real
/// provider — this binary has no opinion on which LLM or integration
/// provider to use, matching how the core itself embeds none (§6.2).
fn bind_default_services(services: &ServiceRegistry) -> anyhow::Result<()> {
    fn opts() -> RegisterOptions {
        RegisterOptions {
            caller: "dipeo-cli".to_string(),
            ..Default::default()
        }
    }

    use dipeo_core::ServiceHandle;

    let file_store: Arc<dyn dipeo_core::builtin::services_api::FileStore> =
        Arc::new(LocalFileStore::new(std::env::current_dir()?));
    services.register("file_store", Arc::new(file_store) as ServiceHandle, opts())?;

    let code_runner: Arc<dyn dipeo_core::builtin::services_api::CodeRunner> =
        Arc::new(SubprocessCodeRunner);
    services.register("code_runner", Arc::new(code_runner) as ServiceHandle, opts())?;

    let http_client: Arc<dyn dipeo_core::builtin::services_api::HttpClient> =
        Arc::new(ReqwestHttpClient::default());
    services.register("http_client", Arc::new(http_client) as ServiceHandle, opts())?;

    let interactive_responder: Arc<dyn dipeo_core::builtin::services_api::InteractiveResponder> =
        Arc::new(StdinResponder);
    services.register(
        "interactive_responder",
        Arc::new(interactive_responder) as ServiceHandle,
        opts(),
    )?;

    let llm: Arc<dyn dipeo_core::builtin::services_api::LlmClient> = Arc::new(UnconfiguredLlmClient);
    services.register("llm", Arc::new(llm) as ServiceHandle, opts())?;

    let provider_client: Arc<dyn dipeo_core::builtin::services_api::ProviderClient> =
        Arc::new(UnconfiguredProviderClient);
    services.register(
        "provider_client",
        Arc::new(provider_client) as ServiceHandle,
        opts(),
    )?;

    let conversation_store: Arc<ConversationStore> = Arc::new(ConversationStore::new());
    services.register(
        "conversation_store",
        Arc::new(conversation_store) as ServiceHandle,
        opts(),
    )?;

    Ok(())
}
