//! Graph traversal

use super::cancel::{ActiveGuard, CancellationToken};
use super::context::{ContextView, ExecutionContext, Shared};
use super::input::InputBroker;
use super::parallel::{self, AbandonPolicy};
use super::record::{
    ExecutionFailure, ExecutionRecord, ExecutionStatus, FailureKind, NodeExecutionResult,
};
use super::retry::{self, RetryOutcome, RetryPolicy};
use super::{Engine, ExecutionRequest};
use crate::condition;
use crate::events::{self, Emitter, EventType};
use crate::executor::ExecutorRegistry;
use crate::graph::{Graph, Node, NodeType};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A validated, registered request waiting to run
pub(crate) struct Prepared {
    pub(crate) request: ExecutionRequest,
    pub(crate) execution_id: String,
    pub(crate) token: CancellationToken,
    pub(crate) guard: ActiveGuard,
}

/// How a walk ended
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    Completed,
    Failed(ExecutionFailure),
    Cancelled,
    TimedOut,
}

impl Flow {
    pub(crate) fn is_completed(&self) -> bool {
        matches!(self, Flow::Completed)
    }
}

pub(crate) struct WalkOutcome {
    pub(crate) flow: Flow,
    /// Output of the last node this walk ran
    pub(crate) last_output: Option<Value>,
    /// Stop nodes this walk reached without running them
    pub(crate) pending: Vec<String>,
    pub(crate) ctx: ExecutionContext,
}

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Everything one execution needs to walk its graph
///
/// Shared by the top-level walk and every parallel branch.
pub(crate) struct Walker {
    pub(crate) graph: Arc<Graph>,
    pub(crate) registry: Arc<ExecutorRegistry>,
    pub(crate) emitter: Emitter,
    pub(crate) inputs: Arc<InputBroker>,
    pub(crate) retry: RetryPolicy,
    pub(crate) continue_on_error: bool,
    pub(crate) abandon: AbandonPolicy,
}

pub(crate) fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

impl Walker {
    /// Depth-first walk from `head`
    ///
    /// Nodes in `stops` are not run; they are reported back in
    /// [`WalkOutcome::pending`] so the enclosing fan-in can dispatch them.
    pub(crate) fn walk(
        self: Arc<Self>,
        head: String,
        upstream: Value,
        ctx: ExecutionContext,
        stops: Arc<HashSet<String>>,
    ) -> BoxFuture<WalkOutcome> {
        Box::pin(async move {
            let mut ctx = ctx;
            let mut stack = vec![(head, upstream)];
            // Nodes reached before all of their predecessors ran
            let mut held: Vec<(String, Value)> = Vec::new();
            let mut last_output = None;
            let mut pending = Vec::new();

            loop {
                let (node_id, upstream, released) = match stack.pop() {
                    Some((node_id, upstream)) => (node_id, upstream, false),
                    None => match self.release(&mut held, &ctx) {
                        Some((node_id, upstream)) => (node_id, upstream, true),
                        None => break,
                    },
                };

                if stops.contains(&node_id) {
                    push_unique(&mut pending, &node_id);
                    continue;
                }
                if let Some(flow) = interrupted(&ctx) {
                    return WalkOutcome {
                        flow,
                        last_output,
                        pending,
                        ctx,
                    };
                }
                let Some(node) = self.graph.node(&node_id) else {
                    continue;
                };
                if ctx.is_claimed(&node_id) {
                    tracing::debug!(node_id = %node_id, "Node already ran, skipping");
                    held.retain(|(id, _)| *id != node_id);
                    continue;
                }
                if !released && self.awaits_predecessor(&node_id, &stack, &held, &ctx) {
                    tracing::debug!(node_id = %node_id, "Holding node until its predecessors run");
                    match held.iter_mut().find(|(id, _)| *id == node_id) {
                        Some(entry) => entry.1 = upstream,
                        None => held.push((node_id, upstream)),
                    }
                    continue;
                }
                held.retain(|(id, _)| *id != node_id);
                if !ctx.claim(&node_id) {
                    tracing::debug!(node_id = %node_id, "Node already ran, skipping");
                    continue;
                }

                let output = match self.visit(node, &upstream, &mut ctx).await {
                    Ok(output) => output,
                    Err(flow) => {
                        return WalkOutcome {
                            flow,
                            last_output,
                            pending,
                            ctx,
                        };
                    }
                };
                last_output = Some(output.clone());

                let (next, guarded) = self.successors(node, &output, &ctx);
                if next.is_empty() && !self.is_terminal(node) {
                    tracing::debug!(node_id = %node.id, "No satisfied edge, path ends");
                }

                let fans_out = node.node_type == NodeType::Parallel || guarded > 1;
                if fans_out && next.len() > 1 {
                    let fan_in = self
                        .clone()
                        .fan_out(node, next, output, &mut ctx, stops.clone())
                        .await;
                    if !fan_in.flow.is_completed() {
                        return WalkOutcome {
                            flow: fan_in.flow,
                            last_output,
                            pending,
                            ctx,
                        };
                    }
                    for id in &fan_in.propagated {
                        push_unique(&mut pending, id);
                    }
                    for join in fan_in.joins.iter().rev() {
                        stack.push((join.clone(), fan_in.output.clone()));
                    }
                    last_output = Some(fan_in.output);
                } else {
                    for target in next.into_iter().rev() {
                        stack.push((target, output.clone()));
                    }
                }
            }

            WalkOutcome {
                flow: Flow::Completed,
                last_output,
                pending,
                ctx,
            }
        })
    }

    /// Run one node through its executor
    ///
    /// `Ok` carries the output traversal continues with, which is
    /// `{"error": message}` for a failure tolerated by `continue_on_error`.
    async fn visit(
        &self,
        node: &Node,
        upstream: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, Flow> {
        self.emitter.node(
            EventType::NodeStarted,
            &node.id,
            events::data([("type", json!(node.node_type.as_str()))]),
        );
        tracing::info!(
            execution_id = %ctx.execution_id(),
            node_id = %node.id,
            node_type = %node.node_type,
            "Running node"
        );

        let RetryOutcome { result, variables, .. } = match self.registry.get(&node.node_type) {
            Ok(executor) => {
                let node_timeout = node.timeout_ms.map(Duration::from_millis);
                let remaining = ctx.remaining();
                let budget = match (node_timeout, remaining) {
                    (Some(own), Some(left)) => Some(own.min(left)),
                    (own, left) => own.or(left),
                };
                let workflow_bound =
                    remaining.is_some_and(|left| node_timeout.is_none_or(|own| left < own));

                let policy = RetryPolicy::for_node(node.retry.as_ref(), &self.retry);
                let view = ContextView::new(ctx, &node.id, upstream, &self.emitter, &self.inputs);
                let mut outcome =
                    retry::run_with_retry(executor.as_ref(), node, &view, &policy, budget).await;

                if outcome.result.error_kind == Some(FailureKind::NodeTimeout)
                    && ((outcome.budget_expired && workflow_bound) || ctx.is_expired())
                {
                    outcome.result.error_kind = Some(FailureKind::WorkflowTimeout);
                }
                outcome
            }
            Err(e) => RetryOutcome {
                result: NodeExecutionResult::failure(
                    &node.id,
                    node.node_type.as_str(),
                    FailureKind::ExecutorNotFound,
                    e.to_string(),
                ),
                variables: Map::new(),
                budget_expired: false,
            },
        };

        if result.success {
            ctx.record_output(&node.id, result.output.clone());
            for (key, value) in variables {
                ctx.set_variable(key, value);
            }
            if self.is_terminal(node) {
                ctx.shared().set_final_output(result.output.clone());
            }

            self.emitter.node(
                EventType::NodeCompleted,
                &node.id,
                events::data([
                    ("output", result.output.clone()),
                    ("duration_ms", json!(result.duration_ms)),
                    ("retry_count", json!(result.retry_count)),
                ]),
            );
            tracing::info!(
                node_id = %node.id,
                duration_ms = result.duration_ms,
                retries = result.retry_count,
                "Node completed"
            );

            let output = result.output.clone();
            ctx.shared().push_result(result);
            return Ok(output);
        }

        let kind = result.error_kind.unwrap_or(FailureKind::NodeExecution);
        let message = result.error.clone().unwrap_or_default();
        self.emitter.node(
            EventType::NodeFailed,
            &node.id,
            events::data([
                ("error", json!(message)),
                ("kind", json!(kind)),
                ("duration_ms", json!(result.duration_ms)),
                ("retry_count", json!(result.retry_count)),
            ]),
        );
        tracing::warn!(
            node_id = %node.id,
            kind = ?kind,
            attempts = result.attempts(),
            error = %message,
            "Node failed"
        );

        let failure = ExecutionFailure::from_node(&result);
        ctx.shared().push_result(result);

        match kind {
            FailureKind::WorkflowTimeout => Err(Flow::TimedOut),
            FailureKind::Cancelled => Err(Flow::Cancelled),
            _ if node.continue_on_error.unwrap_or(self.continue_on_error) => {
                tracing::debug!(node_id = %node.id, "Continuing past failed node");
                Ok(json!({ "error": message }))
            }
            _ => Err(Flow::Failed(failure)),
        }
    }

    /// Targets of the satisfied outgoing edges, in declaration order, and how
    /// many of those edges carried a guard
    fn successors(
        &self,
        node: &Node,
        output: &Value,
        ctx: &ExecutionContext,
    ) -> (Vec<String>, usize) {
        let scope = ctx.scope(output);
        let mut targets = Vec::new();
        let mut guarded = 0;
        for edge in self.graph.outgoing(&node.id) {
            if condition::guard_allows(edge.guard.as_deref(), &scope) {
                if edge.guard.as_deref().is_some_and(|g| !g.trim().is_empty()) {
                    guarded += 1;
                }
                push_unique(&mut targets, &edge.target);
            } else {
                tracing::debug!(edge = %edge.id, guard = ?edge.guard, "Edge guard not satisfied");
            }
        }
        (targets, guarded)
    }

    /// Whether a predecessor of `node_id` has not run yet but still can,
    /// because it is reachable from work this walk has queued
    fn awaits_predecessor(
        &self,
        node_id: &str,
        stack: &[(String, Value)],
        held: &[(String, Value)],
        ctx: &ExecutionContext,
    ) -> bool {
        if self.graph.incoming_count(node_id) < 2 {
            return false;
        }
        let waiting: Vec<&str> = self
            .graph
            .edges
            .iter()
            .filter(|e| e.target == node_id && e.source != node_id)
            .map(|e| e.source.as_str())
            .filter(|source| !ctx.is_claimed(source))
            .collect();
        if waiting.is_empty() {
            return false;
        }

        let ahead: HashSet<&str> = stack
            .iter()
            .chain(held)
            .filter(|(id, _)| id != node_id)
            .flat_map(|(id, _)| parallel::reachable(&self.graph, id))
            .collect();
        waiting.iter().any(|source| ahead.contains(source))
    }

    /// Next held node once the stack is drained
    ///
    /// Picks the first held node no other held node can still feed; in an
    /// acyclic graph one always exists.
    fn release(
        &self,
        held: &mut Vec<(String, Value)>,
        ctx: &ExecutionContext,
    ) -> Option<(String, Value)> {
        if held.is_empty() {
            return None;
        }
        let index = (0..held.len())
            .find(|&i| !self.awaits_predecessor(&held[i].0, &[], held, ctx))
            .unwrap_or(0);
        Some(held.remove(index))
    }

    fn is_terminal(&self, node: &Node) -> bool {
        node.node_type == NodeType::End || self.graph.outgoing(&node.id).next().is_none()
    }
}

/// Cancellation or deadline observed at a dispatch boundary
pub(crate) fn interrupted(ctx: &ExecutionContext) -> Option<Flow> {
    if ctx.is_cancelled() {
        Some(Flow::Cancelled)
    } else if ctx.is_expired() {
        Some(Flow::TimedOut)
    } else {
        None
    }
}

impl Engine {
    pub(crate) async fn run(&self, prepared: Prepared) -> ExecutionRecord {
        let Prepared {
            request,
            execution_id,
            token,
            guard: _guard,
        } = prepared;
        let ExecutionRequest {
            graph,
            input,
            variables,
            options,
            ..
        } = request;

        let timeout = options.timeout.or(self.settings.timeout);
        let mut retry = self.settings.retry.clone();
        if let Some(max_retries) = options.max_retries {
            retry.max_retries = max_retries;
        }

        let shared = Arc::new(Shared::new(&graph.id, &execution_id, input, timeout));
        let ctx = ExecutionContext::new(shared.clone(), variables, token);
        let emitter = Emitter::new(self.sink.clone(), &graph.id, &execution_id);
        let walker = Arc::new(Walker {
            graph: graph.clone(),
            registry: self.registry.clone(),
            emitter: emitter.clone(),
            inputs: self.inputs.clone(),
            retry,
            continue_on_error: options
                .continue_on_error
                .unwrap_or(self.settings.continue_on_error),
            abandon: options.abandon.unwrap_or(self.settings.abandon),
        });

        self.active.set_status(&execution_id, ExecutionStatus::Running);
        emitter.workflow(
            EventType::WorkflowStarted,
            events::data([
                ("name", json!(graph.display_name())),
                ("input", ctx.input().clone()),
            ]),
        );
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %graph.id,
            nodes = graph.nodes.len(),
            "Starting execution"
        );

        let start = graph.start_node().map(|node| node.id.clone());
        let (flow, last_output, variables) = match start {
            Some(start) => {
                let upstream = ctx.input().clone();
                let outcome = walker
                    .walk(start, upstream, ctx, Arc::new(HashSet::new()))
                    .await;
                (outcome.flow, outcome.last_output, outcome.ctx.variables().clone())
            }
            // validated graphs always have one
            None => (
                Flow::Failed(ExecutionFailure {
                    node_id: None,
                    kind: FailureKind::NodeExecution,
                    message: "graph has no start node".to_string(),
                    attempts: 0,
                }),
                None,
                ctx.variables().clone(),
            ),
        };

        let status = match &flow {
            Flow::Completed => ExecutionStatus::Completed,
            Flow::Failed(_) => ExecutionStatus::Failed,
            Flow::Cancelled => ExecutionStatus::Cancelled,
            Flow::TimedOut => ExecutionStatus::TimedOut,
        };
        let error = match flow {
            Flow::Completed => None,
            Flow::Failed(failure) => Some(failure),
            Flow::Cancelled => Some(ExecutionFailure {
                node_id: None,
                kind: FailureKind::Cancelled,
                message: "execution cancelled".to_string(),
                attempts: 0,
            }),
            Flow::TimedOut => Some(ExecutionFailure {
                node_id: None,
                kind: FailureKind::WorkflowTimeout,
                message: format!(
                    "workflow exceeded its timeout of {}ms",
                    timeout.unwrap_or_default().as_millis()
                ),
                attempts: 0,
            }),
        };

        let record = ExecutionRecord {
            execution_id: execution_id.clone(),
            workflow_id: graph.id.clone(),
            status,
            output: shared
                .final_output()
                .or(last_output)
                .unwrap_or(Value::Null),
            error,
            node_results: shared.results(),
            fan_ins: shared.fan_ins(),
            variables,
            started_at: shared.started_at(),
            total_duration_ms: shared.elapsed().as_millis() as u64,
        };

        self.active.set_status(&execution_id, status);
        emit_terminal(&emitter, &record);
        record
    }
}

fn emit_terminal(emitter: &Emitter, record: &ExecutionRecord) {
    let mut data = events::data([
        ("status", json!(record.status)),
        ("duration_ms", json!(record.total_duration_ms)),
    ]);

    match record.status {
        ExecutionStatus::Completed => {
            data.insert("output".into(), record.output.clone());
            tracing::info!(
                execution_id = %record.execution_id,
                duration_ms = record.total_duration_ms,
                "Execution completed"
            );
            emitter.workflow(EventType::WorkflowCompleted, data);
        }
        ExecutionStatus::Cancelled => {
            tracing::info!(execution_id = %record.execution_id, "Execution cancelled");
            emitter.workflow(EventType::WorkflowCancelled, data);
        }
        _ => {
            if let Some(error) = &record.error {
                data.insert("error".into(), json!(error.message));
                data.insert("kind".into(), json!(error.kind));
                if let Some(node_id) = &error.node_id {
                    data.insert("node_id".into(), json!(node_id));
                }
            }
            tracing::warn!(
                execution_id = %record.execution_id,
                status = %record.status,
                error = ?record.error.as_ref().map(|e| e.to_string()),
                "Execution failed"
            );
            emitter.workflow(EventType::WorkflowFailed, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, ExecutionRequest};
    use crate::events::MemorySink;
    use crate::executor::{ContextView, ExecutorError, NodeExecutor, NodeOutput};
    use crate::graph::{Edge, RetrySpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns `config.value`, or the upstream output when absent
    struct Emit;

    #[async_trait]
    impl NodeExecutor for Emit {
        async fn execute(
            &self,
            node: &Node,
            ctx: &ContextView<'_>,
        ) -> Result<NodeOutput, ExecutorError> {
            let value = node.config.get("value").cloned().unwrap_or_else(|| ctx.upstream().clone());
            let mut output = NodeOutput::new(value.clone());
            if let Some(key) = node.config_str("save_as") {
                output = output.with_variable(key, value);
            }
            Ok(output)
        }
    }

    struct AlwaysFails(AtomicU32);

    #[async_trait]
    impl NodeExecutor for AlwaysFails {
        async fn execute(
            &self,
            _node: &Node,
            _ctx: &ContextView<'_>,
        ) -> Result<NodeOutput, ExecutorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::failed("boom"))
        }
    }

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::with_builtins().with_executor("emit", Emit)
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_upstream_output_flows_to_next_node() {
        let graph = Graph::new("flow")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("a", "emit").with_config("value", json!({"n": 1})))
            .with_node(Node::new("b", "emit"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("b", "end"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.node_result("b").unwrap().output, json!({"n": 1}));
        assert_eq!(record.output["a"], json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_sequential_successors_in_declaration_order() {
        let graph = Graph::new("fork")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("a", "emit").with_config("value", "A"))
            .with_node(Node::new("a2", "emit"))
            .with_node(Node::new("b", "emit").with_config("value", "B"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("start", "b"))
            .with_edge(Edge::new("a", "a2"))
            .with_edge(Edge::new("a2", "end"))
            .with_edge(Edge::new("b", "end"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        // the first edge is walked as far as it can go, end waits for b
        assert_eq!(record.visited(), vec!["start", "a", "a2", "b", "end"]);
        assert_eq!(record.output["a2"], "A");
        assert_eq!(record.output["b"], "B");
    }

    #[tokio::test]
    async fn test_sequential_join_runs_after_every_predecessor() {
        let graph = Graph::new("diamond")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("a", "emit").with_config("value", "A"))
            .with_node(Node::new("b", "emit").with_config("value", "B"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("start", "b"))
            .with_edge(Edge::new("a", "end"))
            .with_edge(Edge::new("b", "end"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        assert_eq!(record.visited(), vec!["start", "a", "b", "end"]);
        assert_eq!(record.output["a"], "A");
        assert_eq!(record.output["b"], "B");
    }

    #[tokio::test]
    async fn test_join_does_not_wait_for_pruned_predecessor() {
        let graph = Graph::new("pruned")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("a", "emit").with_config("value", "A"))
            .with_node(Node::new("b", "emit").with_config("value", "B"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("start", "b").with_guard("input.take_b == true"))
            .with_edge(Edge::new("a", "end"))
            .with_edge(Edge::new("b", "end"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({"take_b": false})))
            .await
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.visited(), vec!["start", "a", "end"]);
    }

    #[tokio::test]
    async fn test_held_join_released_when_last_path_is_pruned() {
        // b runs but its edge to end is not taken, so end is released afterwards
        let graph = Graph::new("released")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("a", "emit").with_config("value", "A"))
            .with_node(Node::new("b", "emit").with_config("value", "B"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("start", "b"))
            .with_edge(Edge::new("a", "end"))
            .with_edge(Edge::new("b", "end").with_guard("output == 'never'"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.visited(), vec!["start", "a", "b", "end"]);
        assert_eq!(record.node_result("end").unwrap().output["b"], "B");
    }

    #[tokio::test]
    async fn test_missing_executor_fails_node() {
        let graph = Graph::new("missing")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "summarize"))
            .with_edge(Edge::new("start", "x"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        let error = record.error.unwrap();
        assert_eq!(error.kind, FailureKind::ExecutorNotFound);
        assert_eq!(error.node_id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_max_retries_option_overrides_default() {
        let failing = Arc::new(AlwaysFails(AtomicU32::new(0)));
        let mut registry = registry();
        registry.register_arc("fail", failing.clone());

        let graph = Graph::new("retry")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "fail"))
            .with_edge(Edge::new("start", "x"));

        let engine = Engine::new(registry).with_settings(fast_settings());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})).with_max_retries(2))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(failing.0.load(Ordering::SeqCst), 3);
        assert_eq!(record.node_result("x").unwrap().retry_count, 2);
        assert_eq!(record.error.unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_node_retry_block_wins_over_option() {
        let failing = Arc::new(AlwaysFails(AtomicU32::new(0)));
        let mut registry = registry();
        registry.register_arc("fail", failing.clone());

        let graph = Graph::new("retry")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "fail").with_retry(RetrySpec {
                max_retries: 1,
                base_delay_ms: Some(1),
                max_delay_ms: Some(1),
            }))
            .with_edge(Edge::new("start", "x"));

        let engine = Engine::new(registry).with_settings(fast_settings());
        engine
            .execute(ExecutionRequest::new(graph, json!({})).with_max_retries(4))
            .await
            .unwrap();

        assert_eq!(failing.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_continue_on_error_passes_error_downstream() {
        let mut registry = registry();
        registry.register("fail", AlwaysFails(AtomicU32::new(0)));

        let graph = Graph::new("tolerant")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "fail"))
            .with_node(Node::new("after", "emit"))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "x"))
            .with_edge(Edge::new("x", "after"))
            .with_edge(Edge::new("after", "end"));

        let engine = Engine::new(registry).with_settings(fast_settings());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})).with_continue_on_error(true))
            .await
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.failed_nodes(), vec!["x"]);
        assert_eq!(record.node_result("after").unwrap().output, json!({"error": "boom"}));
        // failed outputs are not stored
        assert!(record.output.get("x").is_none());
    }

    #[tokio::test]
    async fn test_node_level_continue_on_error() {
        let mut registry = registry();
        registry.register("fail", AlwaysFails(AtomicU32::new(0)));

        let graph = Graph::new("tolerant")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "fail").with_continue_on_error(true))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "x"))
            .with_edge(Edge::new("x", "end"));

        let engine = Engine::new(registry).with_settings(fast_settings());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();
        assert!(record.is_success());
    }

    #[tokio::test]
    async fn test_variables_written_by_executors() {
        let graph = Graph::new("vars")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(
                Node::new("a", "emit")
                    .with_config("value", "draft")
                    .with_config("save_as", "stage"),
            )
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "a"))
            .with_edge(Edge::new("a", "end"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})).with_variable("owner", "ada"))
            .await
            .unwrap();

        assert_eq!(record.variables["stage"], "draft");
        assert_eq!(record.variables["owner"], "ada");
    }

    #[tokio::test]
    async fn test_guard_sees_variables() {
        let graph = Graph::new("guarded")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("yes", "emit").with_config("value", "yes"))
            .with_node(Node::new("no", "emit").with_config("value", "no"))
            .with_edge(Edge::new("start", "yes").with_guard("variables.mode == 'fast'"))
            .with_edge(Edge::new("start", "no").with_guard("variables.mode != 'fast'"));

        let engine = Engine::new(registry());
        let record = engine
            .execute(ExecutionRequest::new(graph, json!({})).with_variable("mode", "fast"))
            .await
            .unwrap();

        assert_eq!(record.visited(), vec!["start", "yes"]);
        assert_eq!(record.output, json!("yes"));
    }

    #[tokio::test]
    async fn test_event_order_for_successful_run() {
        let sink = Arc::new(MemorySink::new());
        let graph = Graph::new("events")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("end", NodeType::End))
            .with_edge(Edge::new("start", "end"));

        let engine = Engine::new(registry()).with_sink(sink.clone());
        engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        let types: Vec<EventType> = sink.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::WorkflowStarted,
                EventType::NodeStarted,
                EventType::NodeCompleted,
                EventType::NodeStarted,
                EventType::NodeCompleted,
                EventType::WorkflowCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_run_emits_single_terminal_event() {
        let sink = Arc::new(MemorySink::new());
        let mut registry = registry();
        registry.register("fail", AlwaysFails(AtomicU32::new(0)));
        let graph = Graph::new("events")
            .with_node(Node::new("start", NodeType::Start))
            .with_node(Node::new("x", "fail"))
            .with_edge(Edge::new("start", "x"));

        let engine = Engine::new(registry)
            .with_settings(fast_settings())
            .with_sink(sink.clone());
        engine
            .execute(ExecutionRequest::new(graph, json!({})))
            .await
            .unwrap();

        let events = sink.events();
        let terminal: Vec<_> = events.iter().filter(|e| e.event_type.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].event_type, EventType::WorkflowFailed);
        assert_eq!(terminal[0].data["node_id"], "x");
        assert!(events.iter().any(|e| e.event_type == EventType::NodeFailed));
    }
}
