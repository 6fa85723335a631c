//! Agent nodes: render a prompt and hand it to an agent backend

use super::{ContextView, ExecutorError, Node, NodeExecutor, NodeOutput, required_str};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Request handed to an agent backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// What an agent answered
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub text: String,
    /// Parsed JSON when the answer is a JSON document
    pub structured: Option<Value>,
    pub duration: Duration,
}

impl AgentResponse {
    pub fn new(text: impl Into<String>, duration: Duration) -> Self {
        let text = text.into();
        let structured = serde_json::from_str(text.trim()).ok();
        Self {
            text,
            structured,
            duration,
        }
    }
}

/// Something that can answer a prompt
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &AgentRequest) -> Result<AgentResponse, ExecutorError>;
}

/// Agent backed by a command-line program
///
/// The rendered prompt is passed as the last argument; stdout is the answer.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandAgent {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(ref model) = request.model {
            cmd.env("FLOWMUX_MODEL", model);
        }
        if let Some(ref system) = request.system {
            cmd.env("FLOWMUX_SYSTEM_PROMPT", system);
        }
        cmd.arg(&request.prompt);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentBackend for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &AgentRequest) -> Result<AgentResponse, ExecutorError> {
        let start = Instant::now();
        let timeout = request.timeout.unwrap_or(self.timeout);

        tracing::debug!(
            agent = %self.name,
            command = %self.command,
            prompt_len = request.prompt.len(),
            "Spawning agent command"
        );

        let child = self.build_command(request).spawn().map_err(|e| {
            ExecutorError::permanent(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExecutorError::failed(format!(
                    "failed to wait for '{}': {}",
                    self.command, e
                )));
            }
            Err(_) => {
                return Err(ExecutorError::Timeout {
                    elapsed: start.elapsed(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(AgentResponse::new(stdout, start.elapsed()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() { stdout } else { stderr };
        Err(ExecutorError::permanent(format!(
            "'{}' exited with code {:?}: {}",
            self.command,
            output.status.code(),
            detail
        )))
    }
}

/// Executor for `agent` nodes
///
/// Config:
/// - `prompt` (required): rendered against `{input, variables, nodes, output}`
/// - `agent`: backend name, defaults to the first registered backend
/// - `system`, `model`: passed through to the backend
/// - `timeout_ms`: per-call limit handed to the backend
/// - `save_as`: variable receiving the parsed answer (or its text)
///
/// Output is `{"agent", "text", "data"}` where `data` is the parsed JSON
/// answer or null.
#[derive(Default)]
pub struct AgentExecutor {
    backends: HashMap<String, Arc<dyn AgentBackend>>,
    default: Option<String>,
    templates: TemplateEngine,
}

impl AgentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its name; the first one becomes the default
    pub fn with_backend(mut self, backend: Arc<dyn AgentBackend>) -> Self {
        let name = backend.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.backends.insert(name, backend);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    fn backend(&self, node: &Node) -> Result<&Arc<dyn AgentBackend>, ExecutorError> {
        let name = node
            .config_str("agent")
            .or(self.default.as_deref())
            .ok_or_else(|| ExecutorError::invalid_config(&node.id, "no agent backend registered"))?;
        self.backends.get(name).ok_or_else(|| {
            ExecutorError::invalid_config(
                &node.id,
                format!("unknown agent '{}' (available: {})", name, self.names().join(", ")),
            )
        })
    }
}

#[async_trait]
impl NodeExecutor for AgentExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let backend = self.backend(node)?;
        let scope = ctx.template_scope();

        let prompt = self.templates.render(required_str(node, "prompt")?, &scope)?;
        let mut request = AgentRequest::new(prompt);
        if let Some(system) = node.config_str("system") {
            request.system = Some(self.templates.render(system, &scope)?);
        }
        request.model = node.config_str("model").map(str::to_string);
        request.timeout = node.config_u64("timeout_ms").map(Duration::from_millis);

        let response = tokio::select! {
            response = backend.complete(&request) => response?,
            _ = ctx.cancellation().cancelled() => return Err(ExecutorError::Cancelled),
        };

        tracing::debug!(
            node_id = %node.id,
            agent = %backend.name(),
            duration_ms = response.duration.as_millis() as u64,
            "Agent answered"
        );

        let data = response.structured.clone().unwrap_or(Value::Null);
        let mut output = NodeOutput::new(json!({
            "agent": backend.name(),
            "text": response.text,
            "data": data,
        }));
        if let Some(key) = node.config_str("save_as") {
            let saved = response
                .structured
                .unwrap_or_else(|| Value::String(response.text.clone()));
            output = output.with_variable(key, saved);
        }
        Ok(output)
    }
}
