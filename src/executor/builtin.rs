//! Control-flow executors: start, end, condition, delay, parallel

use super::{ContextView, ExecutorError, Node, NodeExecutor, NodeOutput, required_str};
use crate::condition;
use crate::engine::Aggregation;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// Passes the workflow input on as its output
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    async fn execute(
        &self,
        _node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        Ok(NodeOutput::new(ctx.input().clone()))
    }
}

/// Collects every node output produced so far, keyed by node id
pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    async fn execute(
        &self,
        _node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        Ok(NodeOutput::new(Value::Object(ctx.node_outputs())))
    }
}

/// Evaluates `config.expression` against the upstream output
///
/// Output is `{"result": bool, "input": <upstream>}`, so outgoing guards can
/// branch on `output.result`. A malformed expression evaluates to false and
/// is reported in the node logs rather than failing the node.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let expression = required_str(node, "expression")?;

        let (result, log) = match condition::try_evaluate(expression, ctx) {
            Ok(result) => (result, None),
            Err(e) => {
                tracing::warn!(
                    node_id = %node.id,
                    expression,
                    error = %e,
                    "Condition evaluation failed"
                );
                (false, Some(format!("expression '{}' failed: {}; result is false", expression, e)))
            }
        };

        let mut output = NodeOutput::new(json!({
            "result": result,
            "input": ctx.upstream(),
        }));
        if let Some(log) = log {
            output = output.with_log(log);
        }
        Ok(output)
    }

    fn retryable(&self) -> bool {
        false
    }
}

/// Sleeps for `config.duration_ms`, then passes the upstream output on
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let millis = node.config_u64("duration_ms").ok_or_else(|| {
            ExecutorError::invalid_config(&node.id, "missing integer field 'duration_ms'")
        })?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
            _ = ctx.cancellation().cancelled() => return Err(ExecutorError::Cancelled),
        }

        Ok(NodeOutput::new(ctx.upstream().clone()))
    }
}

/// Fan-out marker; the engine schedules the branches
///
/// Validates `config.aggregation` and passes the upstream output on to
/// every branch.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        if let Some(value) = node.config.get("aggregation") {
            let valid = value.as_str().and_then(Aggregation::parse).is_some();
            if !valid {
                return Err(ExecutorError::invalid_config(
                    &node.id,
                    format!("aggregation must be all, any or majority, got {}", value),
                ));
            }
        }
        Ok(NodeOutput::new(ctx.upstream().clone()))
    }

    fn retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::testing::Harness;

    #[tokio::test]
    async fn test_start_passes_input() {
        let harness = Harness::new(json!({"issue": 7}));
        let upstream = json!({"issue": 7});
        let output = StartExecutor
            .execute(&Node::new("start", "start"), &harness.view("start", &upstream))
            .await
            .unwrap();
        assert_eq!(output.value, json!({"issue": 7}));
    }

    #[tokio::test]
    async fn test_end_collects_outputs() {
        let harness = Harness::new(json!({}));
        harness.ctx.record_output("a", json!(1));
        harness.ctx.record_output("b", json!("two"));

        let upstream = Value::Null;
        let output = EndExecutor
            .execute(&Node::new("end", "end"), &harness.view("end", &upstream))
            .await
            .unwrap();
        assert_eq!(output.value, json!({"a": 1, "b": "two"}));
    }

    #[tokio::test]
    async fn test_condition_true_and_false() {
        let harness = Harness::new(json!({}));
        let node = Node::new("check", "condition").with_config("expression", "output.score > 0.5");

        let high = json!({"score": 0.7});
        let output = ConditionExecutor
            .execute(&node, &harness.view("check", &high))
            .await
            .unwrap();
        assert_eq!(output.value["result"], true);
        assert_eq!(output.value["input"], high);

        let low = json!({"score": 0.3});
        let output = ConditionExecutor
            .execute(&node, &harness.view("check", &low))
            .await
            .unwrap();
        assert_eq!(output.value["result"], false);
    }

    #[tokio::test]
    async fn test_condition_malformed_is_false() {
        let harness = Harness::new(json!({}));
        let node = Node::new("check", "condition").with_config("expression", "output.score >");
        let upstream = json!({"score": 0.7});

        let output = ConditionExecutor
            .execute(&node, &harness.view("check", &upstream))
            .await
            .unwrap();
        assert_eq!(output.value["result"], false);
        assert_eq!(output.logs.len(), 1);
    }

    #[tokio::test]
    async fn test_condition_requires_expression() {
        let harness = Harness::new(json!({}));
        let upstream = Value::Null;
        let result = ConditionExecutor
            .execute(&Node::new("check", "condition"), &harness.view("check", &upstream))
            .await;
        assert!(matches!(result, Err(ExecutorError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_delay_passes_upstream() {
        let harness = Harness::new(json!({}));
        let node = Node::new("wait", "delay").with_config("duration_ms", 5);
        let upstream = json!({"kept": true});

        let output = DelayExecutor
            .execute(&node, &harness.view("wait", &upstream))
            .await
            .unwrap();
        assert_eq!(output.value, upstream);
    }

    #[tokio::test]
    async fn test_delay_cancelled() {
        let harness = Harness::new(json!({}));
        let node = Node::new("wait", "delay").with_config("duration_ms", 60_000);
        let upstream = Value::Null;

        harness.ctx.cancellation().cancel();
        let result = DelayExecutor
            .execute(&node, &harness.view("wait", &upstream))
            .await;
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parallel_rejects_unknown_aggregation() {
        let harness = Harness::new(json!({}));
        let upstream = Value::Null;

        let bad = Node::new("fan", "parallel").with_config("aggregation", "most");
        let result = ParallelExecutor.execute(&bad, &harness.view("fan", &upstream)).await;
        assert!(matches!(result, Err(ExecutorError::InvalidConfig { .. })));

        let good = Node::new("fan", "parallel").with_config("aggregation", "any");
        assert!(
            ParallelExecutor
                .execute(&good, &harness.view("fan", &upstream))
                .await
                .is_ok()
        );
    }
}
