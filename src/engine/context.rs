//! Execution context and the read-only view handed to executors

use super::cancel::CancellationToken;
use super::input::InputBroker;
use super::record::{FanInRecord, NodeExecutionResult};
use crate::condition::Scope;
use crate::events::{Emitter, EventType};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// State shared by every branch of one execution
pub(crate) struct Shared {
    workflow_id: String,
    execution_id: String,
    input: Value,
    started_at: DateTime<Utc>,
    clock: Instant,
    deadline: Option<Duration>,
    node_outputs: RwLock<Map<String, Value>>,
    claimed: Mutex<HashSet<String>>,
    results: Mutex<Vec<NodeExecutionResult>>,
    fan_ins: Mutex<Vec<FanInRecord>>,
    final_output: Mutex<Option<Value>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        input: Value,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            input,
            started_at: Utc::now(),
            clock: Instant::now(),
            deadline,
            node_outputs: RwLock::new(Map::new()),
            claimed: Mutex::new(HashSet::new()),
            results: Mutex::new(Vec::new()),
            fan_ins: Mutex::new(Vec::new()),
            final_output: Mutex::new(None),
        }
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub(crate) fn push_result(&self, result: NodeExecutionResult) {
        lock(&self.results).push(result);
    }

    pub(crate) fn results(&self) -> Vec<NodeExecutionResult> {
        lock(&self.results).clone()
    }

    pub(crate) fn push_fan_in(&self, record: FanInRecord) {
        lock(&self.fan_ins).push(record);
    }

    pub(crate) fn fan_ins(&self) -> Vec<FanInRecord> {
        lock(&self.fan_ins).clone()
    }

    pub(crate) fn set_final_output(&self, output: Value) {
        *lock(&self.final_output) = Some(output);
    }

    pub(crate) fn final_output(&self) -> Option<Value> {
        lock(&self.final_output).clone()
    }
}

/// Per-branch view of an execution
///
/// Variables are copied when a branch forks and the keys written since the
/// fork are tracked so the fan-in can merge them back. Node outputs are
/// shared by all branches and written once per node.
pub struct ExecutionContext {
    shared: Arc<Shared>,
    variables: Map<String, Value>,
    written: Vec<String>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new(
        shared: Arc<Shared>,
        variables: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            variables,
            written: Vec::new(),
            cancel,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.shared.workflow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.shared.execution_id
    }

    pub fn input(&self) -> &Value {
        &self.shared.input
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Workflow time budget still available; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.shared
            .deadline
            .map(|deadline| deadline.saturating_sub(self.shared.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Output of a node that already completed
    pub fn node_output(&self, node_id: &str) -> Option<Value> {
        self.shared
            .node_outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    /// Snapshot of every stored node output
    pub fn node_outputs(&self) -> Map<String, Value> {
        self.shared
            .node_outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_variable(&mut self, key: String, value: Value) {
        if !self.written.contains(&key) {
            self.written.push(key.clone());
        }
        self.variables.insert(key, value);
    }

    /// Store a node output; a node id is written at most once
    pub(crate) fn record_output(&self, node_id: &str, output: Value) -> bool {
        let mut outputs = self
            .shared
            .node_outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if outputs.contains_key(node_id) {
            return false;
        }
        outputs.insert(node_id.to_string(), output);
        true
    }

    /// Reserve a node for this execution; false if it already ran
    pub(crate) fn claim(&self, node_id: &str) -> bool {
        lock(&self.shared.claimed).insert(node_id.to_string())
    }

    pub(crate) fn is_claimed(&self, node_id: &str) -> bool {
        lock(&self.shared.claimed).contains(node_id)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Copy for a parallel branch
    pub(crate) fn fork(&self, cancel: CancellationToken) -> Self {
        Self {
            shared: self.shared.clone(),
            variables: self.variables.clone(),
            written: Vec::new(),
            cancel,
        }
    }

    /// Apply the variable writes of a finished branch
    pub(crate) fn merge(&mut self, branch: &ExecutionContext) {
        for key in &branch.written {
            if let Some(value) = branch.variables.get(key) {
                if self.written.contains(key) && self.variables.get(key) != Some(value) {
                    tracing::debug!(variable = %key, "Later branch overwrites variable");
                }
                self.set_variable(key.clone(), value.clone());
            }
        }
    }

    /// Scope for guards on the edges leaving a node
    pub(crate) fn scope<'a>(&'a self, output: &'a Value) -> ExpressionScope<'a> {
        ExpressionScope { output, ctx: self }
    }

    /// `{input, variables, nodes, output}` for template rendering
    pub(crate) fn template_scope(&self, output: &Value) -> Value {
        serde_json::json!({
            "input": self.shared.input,
            "variables": self.variables,
            "nodes": self.node_outputs(),
            "output": output,
        })
    }
}

/// Roots visible to guard and condition expressions
pub(crate) struct ExpressionScope<'a> {
    output: &'a Value,
    ctx: &'a ExecutionContext,
}

impl Scope for ExpressionScope<'_> {
    fn root(&self, name: &str) -> Option<Cow<'_, Value>> {
        match name {
            "output" => Some(Cow::Borrowed(self.output)),
            "input" => Some(Cow::Borrowed(self.ctx.input())),
            "variables" => Some(Cow::Owned(Value::Object(self.ctx.variables.clone()))),
            "nodes" => Some(Cow::Owned(Value::Object(self.ctx.node_outputs()))),
            _ => None,
        }
    }
}

/// Read-only view of the execution for one node invocation
pub struct ContextView<'a> {
    ctx: &'a ExecutionContext,
    node_id: &'a str,
    upstream: &'a Value,
    emitter: &'a Emitter,
    inputs: &'a InputBroker,
}

impl<'a> ContextView<'a> {
    pub(crate) fn new(
        ctx: &'a ExecutionContext,
        node_id: &'a str,
        upstream: &'a Value,
        emitter: &'a Emitter,
        inputs: &'a InputBroker,
    ) -> Self {
        Self {
            ctx,
            node_id,
            upstream,
            emitter,
            inputs,
        }
    }

    pub fn execution_id(&self) -> &str {
        self.ctx.execution_id()
    }

    pub fn workflow_id(&self) -> &str {
        self.ctx.workflow_id()
    }

    pub fn node_id(&self) -> &str {
        self.node_id
    }

    /// Workflow input
    pub fn input(&self) -> &Value {
        self.ctx.input()
    }

    /// Output of the node this one was reached from
    pub fn upstream(&self) -> &Value {
        self.upstream
    }

    pub fn variables(&self) -> &Map<String, Value> {
        self.ctx.variables()
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.ctx.variables().get(key)
    }

    pub fn node_output(&self, node_id: &str) -> Option<Value> {
        self.ctx.node_output(node_id)
    }

    pub fn node_outputs(&self) -> Map<String, Value> {
        self.ctx.node_outputs()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.ctx.cancellation()
    }

    /// Workflow time budget still available
    pub fn remaining(&self) -> Option<Duration> {
        self.ctx.remaining()
    }

    /// Pending human input requests of the engine
    pub fn inputs(&self) -> &InputBroker {
        self.inputs
    }

    /// Announce that the node is suspended waiting for external input
    pub fn notify_waiting(&self, data: Map<String, Value>) {
        self.emitter.node(EventType::NodeWaiting, self.node_id, data);
    }

    /// JSON scope for template rendering, with the upstream output as `output`
    pub fn template_scope(&self) -> Value {
        self.ctx.template_scope(self.upstream)
    }
}

impl Scope for ContextView<'_> {
    fn root(&self, name: &str) -> Option<Cow<'_, Value>> {
        match name {
            "output" => Some(Cow::Borrowed(self.upstream)),
            "input" => Some(Cow::Borrowed(self.ctx.input())),
            "variables" => Some(Cow::Owned(Value::Object(self.ctx.variables.clone()))),
            "nodes" => Some(Cow::Owned(Value::Object(self.ctx.node_outputs()))),
            _ => None,
        }
    }
}
