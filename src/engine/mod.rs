//! Workflow execution engine
//!
//! The engine walks a validated graph from its start node, dispatching each
//! node to the executor registered for its type. Traversal is depth-first in
//! edge declaration order. Parallel nodes, and nodes whose output satisfies
//! more than one guarded edge, fan out into concurrent branches that are
//! aggregated before traversal continues.
//!
//! # Example
//!
//! ```no_run
//! use flowmux::engine::{Engine, ExecutionRequest};
//! use flowmux::executor::ExecutorRegistry;
//! use flowmux::graph::{Edge, Graph, Node, NodeType};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), flowmux::engine::EngineError> {
//! let graph = Graph::new("hello")
//!     .with_node(Node::new("start", NodeType::Start))
//!     .with_node(Node::new("end", NodeType::End))
//!     .with_edge(Edge::new("start", "end"));
//!
//! let engine = Engine::new(ExecutorRegistry::with_builtins());
//! let record = engine
//!     .execute(ExecutionRequest::new(graph, json!({"name": "ada"})))
//!     .await?;
//! assert!(record.is_success());
//! # Ok(())
//! # }
//! ```

mod cancel;
pub(crate) mod context;
mod input;
mod parallel;
mod record;
mod retry;
mod runner;

use crate::events::{EventSink, NullSink};
use crate::executor::ExecutorRegistry;
use crate::graph::{self, Graph, GraphValidationError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use cancel::{ActiveExecutions, CancellationToken};
pub use context::{ContextView, ExecutionContext};
pub use input::{InputBroker, PendingInput};
pub use parallel::AbandonPolicy;
pub use record::{
    Aggregation, BranchRecord, BranchStatus, ExecutionFailure, ExecutionRecord, ExecutionStatus,
    FailureKind, FanInRecord, LogEntry, LogLevel, NodeExecutionResult,
};
pub use retry::{RetryOutcome, RetryPolicy, run_with_retry};

use cancel::ActiveGuard;
use runner::Prepared;

/// Errors returned by engine operations
///
/// Node failures are not errors here; they end up in the
/// [`ExecutionRecord`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid graph: {0}")]
    Validation(#[from] GraphValidationError),

    #[error("execution '{id}' is already running")]
    DuplicateExecution { id: String },

    #[error("no active execution '{id}'")]
    UnknownExecution { id: String },

    #[error("node '{node_id}' of execution '{execution_id}' is not waiting for input")]
    InputNotAwaited {
        execution_id: String,
        node_id: String,
    },

    #[error("execution task failed: {0}")]
    Join(String),
}

/// Engine-wide defaults, overridable per request
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Retry policy for nodes without their own `retry` block
    pub retry: RetryPolicy,
    /// Workflow timeout; `None` is unbounded
    pub timeout: Option<Duration>,
    pub continue_on_error: bool,
    pub abandon: AbandonPolicy,
}

/// Per-request overrides of [`EngineSettings`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub continue_on_error: Option<bool>,
    pub abandon: Option<AbandonPolicy>,
}

/// A graph plus the input to run it with
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub graph: Arc<Graph>,
    pub input: Value,
    /// Initial variables
    pub variables: Map<String, Value>,
    pub options: ExecutionOptions,
    /// Caller-chosen id; a UUID is generated when absent
    pub execution_id: Option<String>,
}

impl ExecutionRequest {
    pub fn new(graph: impl Into<Arc<Graph>>, input: Value) -> Self {
        Self {
            graph: graph.into(),
            input,
            variables: Map::new(),
            options: ExecutionOptions::default(),
            execution_id: None,
        }
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.options.continue_on_error = Some(continue_on_error);
        self
    }

    pub fn with_abandon(mut self, abandon: AbandonPolicy) -> Self {
        self.options.abandon = Some(abandon);
        self
    }
}

/// A running execution started with [`Engine::spawn`]
pub struct ExecutionHandle {
    execution_id: String,
    token: CancellationToken,
    handle: JoinHandle<ExecutionRecord>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the final record
    pub async fn wait(self) -> Result<ExecutionRecord, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::Join(e.to_string()))
    }
}

/// Workflow execution engine
///
/// Cheap to clone; clones share the registry, the event sink and the table of
/// active executions.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    sink: Arc<dyn EventSink>,
    settings: Arc<EngineSettings>,
    active: Arc<ActiveExecutions>,
    inputs: Arc<InputBroker>,
}

impl Engine {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            sink: Arc::new(NullSink),
            settings: Arc::new(EngineSettings::default()),
            active: Arc::new(ActiveExecutions::new()),
            inputs: Arc::new(InputBroker::new()),
        }
    }

    /// Publish lifecycle events to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run a graph to completion
    ///
    /// Returns `Err` only when the request is rejected before anything runs;
    /// failed, cancelled and timed-out executions are reported through the
    /// record's status.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionRecord, EngineError> {
        let prepared = self.prepare(request)?;
        Ok(self.run(prepared).await)
    }

    /// Start a graph on a background task
    ///
    /// The execution is registered before this returns, so its id can be
    /// used with [`Self::cancel`] and [`Self::submit_input`] right away.
    pub fn spawn(&self, request: ExecutionRequest) -> Result<ExecutionHandle, EngineError> {
        let prepared = self.prepare(request)?;
        let execution_id = prepared.execution_id.clone();
        let token = prepared.token.clone();
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run(prepared).await });
        Ok(ExecutionHandle {
            execution_id,
            token,
            handle,
        })
    }

    /// Request cancellation of an active execution
    pub fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        if self.active.cancel(execution_id) {
            tracing::info!(execution_id = %execution_id, "Cancellation requested");
            Ok(())
        } else {
            Err(EngineError::UnknownExecution {
                id: execution_id.to_string(),
            })
        }
    }

    /// Resume a human_input node waiting in an execution
    pub fn submit_input(
        &self,
        execution_id: &str,
        node_id: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        self.inputs.submit(execution_id, node_id, value)
    }

    /// Ids of executions that have not finished, sorted
    pub fn active_executions(&self) -> Vec<String> {
        self.active.ids()
    }

    /// Status of an active execution
    pub fn status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.active.status(execution_id)
    }

    fn prepare(&self, request: ExecutionRequest) -> Result<Prepared, EngineError> {
        graph::validate(&request.graph)?;

        let execution_id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let token = self.active.register(&execution_id)?;
        let guard = ActiveGuard::new(self.active.clone(), execution_id.clone());

        Ok(Prepared {
            request,
            execution_id,
            token,
            guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::graph::{Edge, Node, NodeType};
    use serde_json::json;

    fn linear() -> Graph {
        Graph::new("linear")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "end"))
    }

    fn waiting() -> Graph {
        Graph::new("waiting")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("ask", NodeType::HumanInput))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "ask"))
            .with_edge(Edge::new("ask", "end"))
    }

    #[tokio::test]
    async fn test_invalid_graph_rejected_without_events() {
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::new(ExecutorRegistry::with_builtins()).with_sink(sink.clone());
        let graph = Graph::new("broken").with_node(Node::new("a", "tool"));

        let err = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(sink.events().is_empty());
        assert!(engine.active_executions().is_empty());
    }

    #[tokio::test]
    async fn test_active_entry_removed_after_execution() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let record = engine
            .execute(ExecutionRequest::new(linear(), json!({})).with_execution_id("run-1"))
            .await
            .unwrap();
        assert_eq!(record.execution_id, "run-1");
        assert!(engine.active_executions().is_empty());
        assert!(engine.status("run-1").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_execution_id_rejected() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let handle = engine
            .spawn(ExecutionRequest::new(waiting(), json!({})).with_execution_id("dup"))
            .unwrap();

        let err = engine
            .spawn(ExecutionRequest::new(linear(), json!({})).with_execution_id("dup"))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::DuplicateExecution { .. }));

        engine.cancel("dup").unwrap();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        assert!(matches!(
            engine.cancel("missing"),
            Err(EngineError::UnknownExecution { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_input_resumes_execution() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let handle = engine
            .spawn(ExecutionRequest::new(waiting(), json!({})))
            .unwrap();
        let id = handle.execution_id().to_string();
        assert_eq!(engine.active_executions(), vec![id.clone()]);

        let mut submitted = false;
        for _ in 0..100 {
            if engine.submit_input(&id, "ask", json!({"approved": true})).is_ok() {
                submitted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(submitted);

        let record = handle.wait().await.unwrap();
        assert!(record.is_success());
        assert_eq!(
            record.node_result("ask").unwrap().output,
            json!({"approved": true})
        );
    }

    #[tokio::test]
    async fn test_submit_input_without_waiting_node() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let err = engine
            .submit_input("nope", "ask", json!(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InputNotAwaited { .. }));
    }
}
