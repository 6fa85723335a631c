//! CLI command implementations

use super::output::{HandlerSink, OutputHandler};
use super::signals;
use anyhow::{Context, Result};
use flowmux::config::{EngineConfig, load_graph};
use flowmux::engine::{Engine, ExecutionRequest};
use flowmux::events::{ChannelSink, Event, EventType, FanoutSink};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Per-run overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: Value,
    pub variables: Map<String, Value>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub continue_on_error: bool,
}

/// Run a graph; returns the process exit code
pub async fn run_graph(
    graph_ref: &str,
    options: RunOptions,
    working_dir: &Path,
    config: &EngineConfig,
    handler: Arc<dyn OutputHandler>,
) -> Result<i32> {
    let graph = load_graph(graph_ref, Some(working_dir))
        .with_context(|| format!("Failed to load graph '{}'", graph_ref))?;
    let registry = config.build_registry()?;

    let (prompts, events) = ChannelSink::channel();
    let sink = FanoutSink::new()
        .with_sink(Arc::new(HandlerSink(handler.clone())))
        .with_sink(Arc::new(prompts));
    let engine = Engine::new(registry)
        .with_settings(config.to_settings())
        .with_sink(Arc::new(sink));

    let mut request = ExecutionRequest::new(graph, options.input).with_variables(options.variables);
    if let Some(ms) = options.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    if let Some(max_retries) = options.max_retries {
        request = request.with_max_retries(max_retries);
    }
    if options.continue_on_error {
        request = request.with_continue_on_error(true);
    }

    let handle = engine.spawn(request)?;
    let signal_task = signals::cancel_on_signal(engine.clone(), handle.execution_id().to_string());
    let prompt_task = tokio::spawn(answer_prompts(engine.clone(), events));

    let record = handle.wait().await;
    signal_task.abort();
    prompt_task.abort();
    let record = record?;

    handler.result(&record);
    Ok(if record.is_success() { 0 } else { 1 })
}

/// Read a line from stdin for every node waiting for input
async fn answer_prompts(engine: Engine, mut events: mpsc::UnboundedReceiver<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(event) = events.recv().await {
        if event.event_type.is_terminal() {
            break;
        }
        if event.event_type != EventType::NodeWaiting {
            continue;
        }
        let Some(node_id) = event.node_id.as_deref() else {
            continue;
        };

        let prompt = event.data.get("prompt").and_then(Value::as_str).unwrap_or("");
        eprint!("{} > ", prompt);

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::warn!(node_id = %node_id, "stdin closed, no input for node");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        let value = parse_value(line.trim());
        if let Err(e) = engine.submit_input(&event.execution_id, node_id, value) {
            tracing::warn!(error = %e, "Input not delivered");
        }
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse `key=value` variables; values are JSON when they parse
pub fn parse_variables(args: &[String]) -> Result<Map<String, Value>, String> {
    let mut parsed = Map::new();

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(format!("invalid variable '{}', expected key=value", arg));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("invalid variable '{}', empty key", arg));
        }
        parsed.insert(key.to_string(), parse_value(value));
    }

    Ok(parsed)
}

/// Parse the `--input` argument; absent input is an empty object
pub fn parse_input(raw: Option<&str>) -> Result<Value, String> {
    match raw {
        None => Ok(Value::Object(Map::new())),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| format!("invalid --input JSON: {}", e))
        }
    }
}

/// Validate a graph
pub fn validate_graph(graph_ref: &str, working_dir: &Path, handler: &dyn OutputHandler) -> i32 {
    match load_graph(graph_ref, Some(working_dir)) {
        Ok(graph) => {
            handler.info(&format!(
                "✓ Graph '{}' is valid ({} nodes, {} edges)",
                graph.display_name(),
                graph.nodes.len(),
                graph.edges.len()
            ));
            0
        }
        Err(e) => {
            handler.info(&format!("✗ {:#}", e));
            1
        }
    }
}

/// List node types with a registered executor
pub fn list_executors(config: &EngineConfig, handler: &dyn OutputHandler) -> Result<i32> {
    let registry = config.build_registry()?;
    for node_type in registry.node_types() {
        handler.info(node_type.as_str());
    }
    Ok(0)
}

/// List configured agents and tools
pub fn list_tools(config: &EngineConfig, handler: &dyn OutputHandler) -> Result<i32> {
    if config.agents.is_empty() && config.tools.is_empty() {
        handler.info("(no agents or tools configured)");
        return Ok(0);
    }

    for (name, agent) in &config.agents {
        let enabled = if agent.enabled { "✓" } else { "✗" };
        let default = if config.defaults.agent.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        handler.info(&format!("{} agent {} - {}{}", enabled, name, agent.command, default));
    }
    for (name, tool) in &config.tools {
        let built = tool.to_tool(name)?;
        handler.info(&format!("✓ {} {} - {}", tool.kind(), name, built.description()));
    }
    Ok(0)
}
