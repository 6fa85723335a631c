//! Lifecycle events emitted during execution
//!
//! The engine publishes events synchronously to a registered [`EventSink`].
//! Sinks must never block: transport (WebSocket broadcast, persistence,
//! terminal output) is the sink's concern, typically by handing the event to
//! a channel.
//!
//! For a single node the order is always `node.started`, optionally
//! `node.waiting`, then exactly one of `node.completed` / `node.failed`.
//! Events of sibling parallel branches may interleave.

mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub use sink::{ChannelSink, EventSink, FanoutSink, FnSink, MemorySink, NullSink, TracingSink};

/// Event type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum EventType {
    #[serde(rename = "workflow.started")]
    WorkflowStarted,
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow.failed")]
    WorkflowFailed,
    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled,
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.completed")]
    NodeCompleted,
    #[serde(rename = "node.failed")]
    NodeFailed,
    #[serde(rename = "node.waiting")]
    NodeWaiting,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkflowStarted => "workflow.started",
            EventType::WorkflowCompleted => "workflow.completed",
            EventType::WorkflowFailed => "workflow.failed",
            EventType::WorkflowCancelled => "workflow.cancelled",
            EventType::NodeStarted => "node.started",
            EventType::NodeCompleted => "node.completed",
            EventType::NodeFailed => "node.failed",
            EventType::NodeWaiting => "node.waiting",
        }
    }

    /// True for the three workflow terminal events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification; produced once, never mutated
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// ISO-8601 timestamp
    pub timestamp: DateTime<Utc>,

    pub workflow_id: String,

    pub execution_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Execution-scoped event publisher
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    workflow_id: String,
    execution_id: String,
}

impl Emitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
        }
    }

    /// Publish a workflow-level event
    pub fn workflow(&self, event_type: EventType, data: Map<String, Value>) {
        self.publish(event_type, None, data);
    }

    /// Publish a node-level event
    pub fn node(&self, event_type: EventType, node_id: &str, data: Map<String, Value>) {
        self.publish(event_type, Some(node_id.to_string()), data);
    }

    fn publish(&self, event_type: EventType, node_id: Option<String>, data: Map<String, Value>) {
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id.clone(),
            node_id,
            data,
        };
        tracing::trace!(event = %event.event_type, node = ?event.node_id, "Publishing event");
        self.sink.publish(event);
    }
}

/// Build an event data map from key/value pairs
pub fn data<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
