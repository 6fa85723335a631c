//! Parallel fan-out and aggregation

use super::context::ExecutionContext;
use super::record::{
    Aggregation, BranchRecord, BranchStatus, ExecutionFailure, FailureKind, FanInRecord,
};
use super::runner::{Flow, WalkOutcome, Walker, interrupted, push_unique};
use crate::graph::{Graph, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What happens to branches still running when a fan-in resolves early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AbandonPolicy {
    /// Let them run to completion unobserved
    #[default]
    Detach,
    /// Cancel them; they dispatch no further nodes
    Stop,
}

/// Result of a fan-out, as seen by the walk that started it
pub(crate) struct FanIn {
    pub(crate) flow: Flow,
    pub(crate) output: Value,
    /// Join nodes to dispatch next, in branch order
    pub(crate) joins: Vec<String>,
    /// Stop nodes of an enclosing fan-out, reached by the branches
    pub(crate) propagated: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    /// Whether the aggregation is decided, and how
    fn resolve(
        &self,
        aggregation: Aggregation,
        total: usize,
        tolerate: bool,
    ) -> Option<Resolution> {
        let finished = self.succeeded + self.failed;
        match aggregation {
            Aggregation::All => (finished == total).then(|| {
                if self.failed == 0 || tolerate {
                    Resolution::Succeeded
                } else {
                    Resolution::Failed
                }
            }),
            Aggregation::Any => {
                if self.succeeded > 0 {
                    Some(Resolution::Succeeded)
                } else if finished == total {
                    Some(Resolution::Failed)
                } else {
                    None
                }
            }
            Aggregation::Majority => {
                let needed = total / 2 + 1;
                if self.succeeded >= needed {
                    Some(Resolution::Succeeded)
                } else if self.succeeded + (total - finished) < needed {
                    Some(Resolution::Failed)
                } else {
                    None
                }
            }
        }
    }
}

/// Nodes reachable from at least two of the heads
///
/// Edge guards are ignored; a join that no branch reaches is never
/// dispatched.
pub(crate) fn join_nodes(graph: &Graph, heads: &[String]) -> HashSet<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for head in heads {
        for id in reachable(graph, head) {
            *counts.entry(id).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id.to_string())
        .collect()
}

/// Nodes reachable from `head`, including itself, ignoring guards
pub(crate) fn reachable<'a>(graph: &'a Graph, head: &str) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&'a str> =
        graph.node(head).map(|n| n.id.as_str()).into_iter().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        for edge in graph.outgoing(id) {
            queue.push_back(edge.target.as_str());
        }
    }
    seen
}

async fn sleep_for(remaining: Option<Duration>) {
    match remaining {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending::<()>().await,
    }
}

impl Walker {
    /// Run `heads` as concurrent branches and aggregate them
    pub(crate) async fn fan_out(
        self: Arc<Self>,
        node: &Node,
        heads: Vec<String>,
        upstream: Value,
        ctx: &mut ExecutionContext,
        outer: Arc<HashSet<String>>,
    ) -> FanIn {
        let aggregation = node
            .config_str("aggregation")
            .and_then(Aggregation::parse)
            .unwrap_or_default();
        let total = heads.len();

        let mut stops: HashSet<String> = (*outer).clone();
        stops.extend(join_nodes(&self.graph, &heads));
        let stops = Arc::new(stops);

        tracing::info!(
            node_id = %node.id,
            branches = total,
            aggregation = %aggregation,
            "Fanning out"
        );

        let fan_token = ctx.cancellation().child();
        let mut set = JoinSet::new();
        for (index, head) in heads.iter().enumerate() {
            let branch = self.clone().walk(
                head.clone(),
                upstream.clone(),
                ctx.fork(fan_token.clone()),
                stops.clone(),
            );
            set.spawn(async move { (index, branch.await) });
        }

        let mut outcomes: Vec<Option<WalkOutcome>> = (0..total).map(|_| None).collect();
        let mut tally = Tally::default();
        let mut winner = None;

        let resolution = loop {
            if let Some(resolution) = tally.resolve(aggregation, total, self.continue_on_error) {
                break resolution;
            }
            let joined = tokio::select! {
                joined = set.join_next() => joined,
                _ = ctx.cancellation().cancelled() => break Resolution::Cancelled,
                _ = sleep_for(ctx.remaining()) => break Resolution::TimedOut,
            };
            match joined {
                Some(Ok((index, outcome))) => {
                    if outcome.flow.is_completed() {
                        tally.succeeded += 1;
                        winner.get_or_insert(index);
                    } else {
                        tally.failed += 1;
                    }
                    tracing::debug!(
                        node_id = %node.id,
                        branch = %heads[index],
                        flow = ?outcome.flow,
                        "Branch finished"
                    );
                    outcomes[index] = Some(outcome);
                }
                Some(Err(e)) => {
                    tracing::error!(node_id = %node.id, error = %e, "Branch task failed");
                    tally.failed += 1;
                }
                None => break Resolution::Failed,
            }
        };

        let unfinished = set.len();
        if unfinished > 0 {
            tracing::info!(
                node_id = %node.id,
                branches = unfinished,
                policy = ?self.abandon,
                "Abandoning unresolved branches"
            );
        }
        if self.abandon == AbandonPolicy::Stop {
            fan_token.cancel();
        }
        set.detach_all();

        let branches = heads
            .iter()
            .zip(&outcomes)
            .map(|(head, outcome)| BranchRecord {
                head: head.clone(),
                status: match outcome.as_ref().map(|o| &o.flow) {
                    None => BranchStatus::Abandoned,
                    Some(Flow::Completed) => BranchStatus::Succeeded,
                    Some(Flow::Failed(_)) => BranchStatus::Failed,
                    Some(Flow::Cancelled) => BranchStatus::Cancelled,
                    Some(Flow::TimedOut) => BranchStatus::TimedOut,
                },
            })
            .collect();

        let mut by_head = Map::new();
        let mut joins = Vec::new();
        let mut propagated = Vec::new();
        for (head, outcome) in heads.iter().zip(&outcomes) {
            let Some(outcome) = outcome.as_ref().filter(|o| o.flow.is_completed()) else {
                continue;
            };
            ctx.merge(&outcome.ctx);
            by_head.insert(
                head.clone(),
                outcome.last_output.clone().unwrap_or(Value::Null),
            );
            for id in &outcome.pending {
                if outer.contains(id) {
                    push_unique(&mut propagated, id);
                } else {
                    push_unique(&mut joins, id);
                }
            }
        }

        let output = match aggregation {
            Aggregation::Any => winner
                .and_then(|index| outcomes[index].as_ref())
                .and_then(|o| o.last_output.clone())
                .unwrap_or(Value::Null),
            Aggregation::All | Aggregation::Majority => Value::Object(by_head),
        };

        ctx.shared().push_fan_in(FanInRecord {
            node_id: node.id.clone(),
            aggregation,
            resolved: resolution == Resolution::Succeeded,
            branches,
            output: output.clone(),
        });

        let flow = match resolution {
            Resolution::Succeeded => Flow::Completed,
            Resolution::Cancelled => Flow::Cancelled,
            Resolution::TimedOut => Flow::TimedOut,
            Resolution::Failed => match interrupted(ctx) {
                Some(flow) => flow,
                None => self.branch_failure(node, aggregation, &tally, total, &outcomes),
            },
        };

        match &flow {
            Flow::Completed => tracing::info!(
                node_id = %node.id,
                succeeded = tally.succeeded,
                failed = tally.failed,
                "Fan-in resolved"
            ),
            _ => tracing::warn!(
                node_id = %node.id,
                succeeded = tally.succeeded,
                failed = tally.failed,
                flow = ?flow,
                "Fan-in failed"
            ),
        }

        FanIn {
            flow,
            output,
            joins,
            propagated,
        }
    }

    /// Failure to report when an aggregation cannot be satisfied
    fn branch_failure(
        &self,
        node: &Node,
        aggregation: Aggregation,
        tally: &Tally,
        total: usize,
        outcomes: &[Option<WalkOutcome>],
    ) -> Flow {
        let first = outcomes.iter().flatten().find_map(|o| match &o.flow {
            Flow::Completed => None,
            flow => Some(flow.clone()),
        });

        match (aggregation, first) {
            (Aggregation::All, Some(flow)) => flow,
            _ => Flow::Failed(ExecutionFailure {
                node_id: Some(node.id.clone()),
                kind: FailureKind::NodeExecution,
                message: format!(
                    "'{}' aggregation not satisfied: {} of {} branches succeeded",
                    aggregation, tally.succeeded, total
                ),
                attempts: 1,
            }),
        }
    }
}
