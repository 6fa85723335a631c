//! Suspends a node until a human submits a value

use super::{ContextView, ExecutorError, Node, NodeExecutor, NodeOutput};
use crate::events;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// Waits for `Engine::submit_input` on this node
///
/// Config:
/// - `prompt`: text shown to the human, rendered as a template
/// - `timeout_ms`: optional limit on the wait
///
/// Emits `node.waiting` with the rendered prompt once registered. The
/// submitted value becomes the node output.
#[derive(Default)]
pub struct HumanInputExecutor {
    templates: TemplateEngine,
}

impl HumanInputExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeExecutor for HumanInputExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let prompt = match node.config_str("prompt") {
            Some(template) => self.templates.render(template, &ctx.template_scope())?,
            None => format!("Input required for '{}'", node.id),
        };
        let timeout = node.config_u64("timeout_ms").map(Duration::from_millis);

        let mut pending = ctx.inputs().wait_for(ctx.execution_id(), &node.id);

        let mut data = events::data([("prompt", Value::String(prompt))]);
        if let Some(timeout) = timeout {
            data.insert("timeout_ms".into(), json!(timeout.as_millis() as u64));
        }
        ctx.notify_waiting(data);
        tracing::info!(node_id = %node.id, execution_id = %ctx.execution_id(), "Waiting for input");

        let expiry = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            value = pending.recv() => value
                .map(NodeOutput::new)
                .ok_or_else(|| ExecutorError::permanent("input channel closed")),
            _ = expiry => Err(ExecutorError::Timeout {
                elapsed: timeout.unwrap_or_default(),
            }),
            _ = ctx.cancellation().cancelled() => Err(ExecutorError::Cancelled),
        }
    }

    fn retryable(&self) -> bool {
        false
    }
}
