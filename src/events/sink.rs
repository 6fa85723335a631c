//! Event sink implementations

use super::{Event, EventType};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Receives lifecycle events; must return promptly
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Discards every event
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

/// Forwards events into an unbounded channel
///
/// Sending never blocks; if the receiver is gone the event is dropped.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self { sender }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: Event) {
        if self.sender.send(event).is_err() {
            tracing::debug!("Event receiver dropped, discarding event");
        }
    }
}

/// Logs events through tracing
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: Event) {
        let node = event.node_id.as_deref().unwrap_or("-");
        match event.event_type {
            EventType::NodeFailed | EventType::WorkflowFailed => tracing::warn!(
                execution_id = %event.execution_id,
                node = node,
                event = %event.event_type,
                data = %serde_json::Value::Object(event.data),
                "Workflow event"
            ),
            _ => tracing::info!(
                execution_id = %event.execution_id,
                node = node,
                event = %event.event_type,
                "Workflow event"
            ),
        }
    }
}

/// Calls a closure for every event
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(Event) + Send + Sync,
{
    fn publish(&self, event: Event) {
        (self.0)(event)
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Publishes every event to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
