//! Retry with exponential backoff around a single node invocation

use super::context::ContextView;
use super::record::{FailureKind, LogEntry, LogLevel, NodeExecutionResult};
use crate::executor::{ExecutorError, NodeExecutor};
use crate::graph::{Node, RetrySpec};
use chrono::Utc;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Retry policy for node execution
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy for a node: its own retry block over the engine defaults
    pub fn for_node(spec: Option<&RetrySpec>, defaults: &RetryPolicy) -> Self {
        match spec {
            Some(spec) => Self {
                max_retries: spec.max_retries,
                base_delay: spec
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_delay),
                max_delay: spec
                    .max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_delay),
                jitter: defaults.jitter,
            },
            None => defaults.clone(),
        }
    }

    /// Calculate delay for a given attempt number
    ///
    /// `min(base_delay * 2^attempt, max_delay)`, plus up to 25% jitter when
    /// enabled, never exceeding `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
        let cap = self.max_delay.as_secs_f64();
        let capped = base.min(cap);

        let delay = if self.jitter {
            (capped + rand::random::<f64>() * 0.25 * capped).min(cap)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Node result plus the variable writes of the successful attempt
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: NodeExecutionResult,
    pub variables: Map<String, Value>,
    /// The timeout given to [`run_with_retry`] expired
    pub budget_expired: bool,
}

struct Attempts {
    count: u32,
    logs: Vec<LogEntry>,
    last_error: Option<ExecutorError>,
}

/// Invoke an executor until it succeeds or the policy is exhausted
///
/// At most `max_retries + 1` invocations. Non-retryable errors, executors
/// that opt out of retries and cancellation during backoff stop the loop
/// early. `timeout` bounds the whole loop including backoff sleeps.
pub async fn run_with_retry(
    executor: &dyn NodeExecutor,
    node: &Node,
    view: &ContextView<'_>,
    policy: &RetryPolicy,
    timeout: Option<Duration>,
) -> RetryOutcome {
    let started_at = Utc::now();
    let start = Instant::now();
    let mut attempts = Attempts {
        count: 0,
        logs: Vec::new(),
        last_error: None,
    };

    let mut budget_expired = false;
    let outcome = {
        let attempt_loop = attempt_loop(executor, node, view, policy, &mut attempts);
        let finished = match timeout {
            Some(limit) => tokio::time::timeout(limit, attempt_loop)
                .await
                .map_err(|_| limit),
            None => Ok(attempt_loop.await),
        };
        match finished {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => {
                let kind = failure_kind(&error);
                Err((error, kind))
            }
            Err(limit) => {
                budget_expired = true;
                Err((
                    ExecutorError::Timeout { elapsed: limit },
                    FailureKind::NodeTimeout,
                ))
            }
        }
    };

    let node_type = node.node_type.as_str();
    let (mut result, variables) = match outcome {
        Ok(output) => {
            let mut result = NodeExecutionResult::success(&node.id, node_type, output.value);
            result
                .logs
                .extend(output.logs.into_iter().map(LogEntry::info));
            (result, output.variables)
        }
        Err((error, kind)) => {
            let mut result =
                NodeExecutionResult::failure(&node.id, node_type, kind, error.to_string());
            result
                .logs
                .push(LogEntry::new(LogLevel::Error, error.to_string()));
            (result, Map::new())
        }
    };

    let mut logs = attempts.logs;
    logs.append(&mut result.logs);
    result.logs = logs;
    result.retry_count = attempts.count.saturating_sub(1);
    result.started_at = started_at;
    result.duration_ms = start.elapsed().as_millis() as u64;

    RetryOutcome {
        result,
        variables,
        budget_expired,
    }
}

fn failure_kind(error: &ExecutorError) -> FailureKind {
    match error {
        ExecutorError::NotFound { .. } => FailureKind::ExecutorNotFound,
        ExecutorError::Cancelled => FailureKind::Cancelled,
        ExecutorError::Timeout { .. } => FailureKind::NodeTimeout,
        _ => FailureKind::NodeExecution,
    }
}

async fn attempt_loop(
    executor: &dyn NodeExecutor,
    node: &Node,
    view: &ContextView<'_>,
    policy: &RetryPolicy,
    attempts: &mut Attempts,
) -> Result<crate::executor::NodeOutput, ExecutorError> {
    let max_retries = if executor.retryable() {
        policy.max_retries
    } else {
        0
    };

    for attempt in 0..=max_retries {
        attempts.count = attempt + 1;

        let error = match executor.execute(node, view).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt == max_retries {
            attempts.last_error = Some(error.clone());
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        let message = format!(
            "attempt {}/{} failed: {}; retrying in {}ms",
            attempt + 1,
            max_retries + 1,
            error,
            delay.as_millis()
        );
        tracing::info!(
            node_id = %node.id,
            attempt = attempt + 1,
            max_attempts = max_retries + 1,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Node attempt failed, retrying"
        );
        attempts.logs.push(LogEntry::info(message));
        attempts.last_error = Some(error);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = view.cancellation().cancelled() => return Err(ExecutorError::Cancelled),
        }
    }

    Err(attempts
        .last_error
        .clone()
        .unwrap_or_else(|| ExecutorError::failed("retries exhausted")))
}
