//! Node executors
//!
//! An executor performs the work of one node type. The engine resolves it
//! from the [`ExecutorRegistry`] by the node's `type`, hands it the node and
//! a read-only [`ContextView`], and stores the returned [`NodeOutput`].
//!
//! Executors should honour the cancellation token exposed by the view when
//! they suspend (sleeping, waiting for input, long I/O). Whether a failed
//! invocation may be retried is decided by [`ExecutorError::is_retryable`]
//! and by [`NodeExecutor::retryable`].
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use flowmux::executor::{ExecutorError, NodeExecutor, NodeOutput};
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl NodeExecutor for Upper {
//!     async fn execute(
//!         &self,
//!         _node: &Node,
//!         ctx: &ContextView<'_>,
//!     ) -> Result<NodeOutput, ExecutorError> {
//!         let text = ctx.upstream().as_str().unwrap_or_default().to_uppercase();
//!         Ok(NodeOutput::new(text.into()))
//!     }
//! }
//!
//! registry.register("upper", Upper);
//! ```

mod agent;
mod builtin;
mod human_input;
mod registry;
pub mod tools;

use crate::template::TemplateError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub use crate::engine::ContextView;
pub use crate::graph::Node;
pub use agent::{AgentBackend, AgentExecutor, AgentRequest, AgentResponse, CommandAgent};
pub use builtin::{
    ConditionExecutor, DelayExecutor, EndExecutor, ParallelExecutor, StartExecutor,
};
pub use human_input::HumanInputExecutor;
pub use registry::ExecutorRegistry;
pub use tools::{HttpTool, ShellTool, Tool, ToolExecutor, ToolSet};

/// Performs the work of one node type
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run the node once
    async fn execute(&self, node: &Node, ctx: &ContextView<'_>)
    -> Result<NodeOutput, ExecutorError>;

    /// Whether failed invocations may be retried at all
    fn retryable(&self) -> bool {
        true
    }
}

/// What a node produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// The node's output value, stored under its id
    pub value: Value,

    /// Variable writes applied to the branch-local variables
    pub variables: Map<String, Value>,

    /// Informational lines attached to the node result
    pub logs: Vec<String>,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_log(mut self, message: impl Into<String>) -> Self {
        self.logs.push(message.into());
        self
    }
}

/// Errors from executor resolution and execution
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("no executor registered for node type '{node_type}'")]
    NotFound { node_type: String },

    #[error("{message}")]
    Failed { message: String, retryable: bool },

    #[error("invalid config for node '{node}': {message}")]
    InvalidConfig { node: String, message: String },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("cancelled")]
    Cancelled,
}

impl ExecutorError {
    /// A failure that may succeed on another attempt
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not change on retry
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_config(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Failed { retryable, .. } => *retryable,
            ExecutorError::Timeout { .. } => true,
            ExecutorError::NotFound { .. }
            | ExecutorError::InvalidConfig { .. }
            | ExecutorError::Template(_)
            | ExecutorError::Cancelled => false,
        }
    }
}

/// Read a required string from node config
pub(crate) fn required_str<'a>(node: &'a Node, key: &str) -> Result<&'a str, ExecutorError> {
    node.config_str(key).ok_or_else(|| {
        ExecutorError::invalid_config(&node.id, format!("missing string field '{}'", key))
    })
}
