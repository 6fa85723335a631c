//! Node type to executor mapping

use super::{
    AgentExecutor, ConditionExecutor, DelayExecutor, EndExecutor, ExecutorError,
    HumanInputExecutor, NodeExecutor, ParallelExecutor, StartExecutor, ToolExecutor,
};
use crate::graph::NodeType;
use std::collections::HashMap;
use std::sync::Arc;

/// Executors by node type
///
/// Built once, then handed to the engine, which never mutates it.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the control-flow executors
    ///
    /// start, end, condition, delay, parallel and human_input. Agent and tool
    /// nodes need backends and tools, registered with [`Self::with_agents`]
    /// and [`Self::with_tools`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Start, StartExecutor);
        registry.register(NodeType::End, EndExecutor);
        registry.register(NodeType::Condition, ConditionExecutor);
        registry.register(NodeType::Delay, DelayExecutor);
        registry.register(NodeType::Parallel, ParallelExecutor);
        registry.register(NodeType::HumanInput, HumanInputExecutor::new());
        registry
    }

    /// Register an executor, replacing any previous one for the type
    pub fn register<E>(&mut self, node_type: impl Into<NodeType>, executor: E)
    where
        E: NodeExecutor + 'static,
    {
        self.register_arc(node_type, Arc::new(executor));
    }

    pub fn register_arc(
        &mut self,
        node_type: impl Into<NodeType>,
        executor: Arc<dyn NodeExecutor>,
    ) {
        let node_type = node_type.into();
        tracing::debug!(node_type = %node_type, "Registering executor");
        self.executors.insert(node_type, executor);
    }

    /// Builder form of [`Self::register`]
    pub fn with_executor<E>(mut self, node_type: impl Into<NodeType>, executor: E) -> Self
    where
        E: NodeExecutor + 'static,
    {
        self.register(node_type, executor);
        self
    }

    pub fn with_agents(self, agents: AgentExecutor) -> Self {
        self.with_executor(NodeType::Agent, agents)
    }

    pub fn with_tools(self, tools: ToolExecutor) -> Self {
        self.with_executor(NodeType::Tool, tools)
    }

    /// Resolve the executor for a node type
    pub fn get(&self, node_type: &NodeType) -> Result<Arc<dyn NodeExecutor>, ExecutorError> {
        self.executors
            .get(node_type)
            .cloned()
            .ok_or_else(|| ExecutorError::NotFound {
                node_type: node_type.to_string(),
            })
    }

    pub fn contains(&self, node_type: &NodeType) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Registered node types, sorted
    pub fn node_types(&self) -> Vec<&NodeType> {
        let mut types: Vec<&NodeType> = self.executors.keys().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }
}
