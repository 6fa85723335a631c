#![allow(dead_code)]

use async_trait::async_trait;
use flowmux::engine::{Engine, EngineSettings, RetryPolicy};
use flowmux::executor::{
    ContextView, ExecutorError, ExecutorRegistry, Node, NodeExecutor, NodeOutput,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Sleeps `config.delay_ms`, then returns `config.value` or the upstream output
pub struct Sleepy;

#[async_trait]
impl NodeExecutor for Sleepy {
    async fn execute(
        &self,
        node: &Node,
        ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let delay = Duration::from_millis(node.config_u64("delay_ms").unwrap_or(0));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancellation().cancelled() => return Err(ExecutorError::Cancelled),
        }
        if node.config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ExecutorError::permanent(format!("{} failed", node.id)));
        }
        let value = node
            .config
            .get("value")
            .cloned()
            .unwrap_or_else(|| ctx.upstream().clone());
        Ok(NodeOutput::new(value))
    }
}

/// Counts invocations; fails until `succeed_after` calls have been made
pub struct Counter {
    pub calls: AtomicU32,
    pub succeed_after: u32,
}

impl Counter {
    pub fn new(succeed_after: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            succeed_after,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExecutor for Counter {
    async fn execute(
        &self,
        node: &Node,
        _ctx: &ContextView<'_>,
    ) -> Result<NodeOutput, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.succeed_after {
            return Err(ExecutorError::failed(format!("{} attempt {} failed", node.id, call)));
        }
        Ok(NodeOutput::new(Value::from(call)))
    }
}

pub fn registry() -> ExecutorRegistry {
    ExecutorRegistry::with_builtins().with_executor("sleepy", Sleepy)
}

/// Engine with millisecond retry delays
pub fn engine(registry: ExecutorRegistry) -> Engine {
    Engine::new(registry).with_settings(EngineSettings {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        },
        ..EngineSettings::default()
    })
}
