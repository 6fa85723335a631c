//! Tool nodes: call a named tool with rendered arguments

mod http;
mod shell;

use super::{ContextView, ExecutorError, Node, NodeExecutor, NodeOutput, required_str};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use http::HttpTool;
pub use shell::ShellTool;

/// An external capability a tool node can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description for listings
    fn description(&self) -> String {
        String::new()
    }

    async fn call(&self, args: &Value) -> Result<Value, ExecutorError>;
}

/// Tools available to an engine, by name
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Executor for `tool` nodes
///
/// Config:
/// - `tool` (required): name in the tool set
/// - `args`: any JSON value; strings inside are rendered as templates
/// - `save_as`: variable receiving the tool result
///
/// The tool result is the node output.
pub struct ToolExecutor {
    tools: ToolSet,
    templates: TemplateEngine,
}

impl ToolExecutor {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            templates: TemplateEngine::new(),
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let name = required_str(node, "tool")?;
        let tool = self.tools.get(name).ok_or_else(|| {
            ExecutorError::invalid_config(
                &node.id,
                format!("unknown tool '{}' (available: {})", name, self.tools.names().join(", ")),
            )
        })?;

        let args = match node.config.get("args") {
            Some(args) => self.templates.render_value(args, &ctx.template_scope())?,
            None => Value::Null,
        };

        tracing::debug!(node_id = %node.id, tool = name, "Calling tool");
        let result = tokio::select! {
            result = tool.call(&args) => result?,
            _ = ctx.cancellation().cancelled() => return Err(ExecutorError::Cancelled),
        };

        let mut output = NodeOutput::new(result.clone());
        if let Some(key) = node.config_str("save_as") {
            output = output.with_variable(key, result);
        }
        Ok(output)
    }
}
