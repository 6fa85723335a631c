//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes. Handlers render
//! engine events as they arrive and print the final record.

use flowmux::engine::{ExecutionRecord, ExecutionStatus};
use flowmux::events::{Event, EventSink, EventType};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Render an engine event
    fn emit(&self, event: &Event);

    /// Informational line outside the event stream
    fn info(&self, message: &str);

    /// Write final result
    fn result(&self, record: &ExecutionRecord);
}

/// Adapts an output handler to the engine's event sink
pub struct HandlerSink(pub Arc<dyn OutputHandler>);

impl EventSink for HandlerSink {
    fn publish(&self, event: Event) {
        self.0.emit(&event);
    }
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

fn data_u64(event: &Event, key: &str) -> u64 {
    event.data.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn data_str<'a>(event: &'a Event, key: &str) -> &'a str {
    event.data.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    /// Create a new console handler
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Line for an event; `None` for events not shown
    fn render(&self, event: &Event) -> Option<String> {
        let node = event.node_id.as_deref().unwrap_or("-");
        let line = match event.event_type {
            EventType::WorkflowStarted => format!(
                "Running graph '{}' ({})",
                data_str(event, "name"),
                event.execution_id
            ),
            EventType::NodeStarted => {
                if !self.debug {
                    return None;
                }
                format!("  → {} ({})", node, data_str(event, "type"))
            }
            EventType::NodeCompleted => format!(
                "  ✓ {} ({})",
                node,
                format_duration(data_u64(event, "duration_ms"))
            ),
            EventType::NodeFailed => {
                let retries = data_u64(event, "retry_count");
                if retries > 0 {
                    format!(
                        "  ✗ {}: {} (after {} retries)",
                        node,
                        data_str(event, "error"),
                        retries
                    )
                } else {
                    format!("  ✗ {}: {}", node, data_str(event, "error"))
                }
            }
            EventType::NodeWaiting => format!("  ? {}: {}", node, data_str(event, "prompt")),
            EventType::WorkflowCompleted => format!(
                "\n✓ Workflow completed in {}",
                format_duration(data_u64(event, "duration_ms"))
            ),
            EventType::WorkflowFailed => {
                if data_str(event, "status") == ExecutionStatus::TimedOut.to_string() {
                    format!("\n✗ Workflow timed out: {}", data_str(event, "error"))
                } else {
                    format!("\n✗ Workflow failed: {}", data_str(event, "error"))
                }
            }
            EventType::WorkflowCancelled => "\n✗ Workflow cancelled".to_string(),
        };
        Some(line)
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: &Event) {
        if let Some(line) = self.render(event) {
            eprintln!("{}", line);
        }
    }

    fn info(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn result(&self, record: &ExecutionRecord) {
        if record.output.is_null() {
            return;
        }
        match &record.output {
            Value::String(s) => println!("{}", s),
            other => {
                if let Ok(s) = serde_json::to_string_pretty(other) {
                    println!("{}", s);
                }
            }
        }
    }
}

/// JSON output handler: one event per line, then the full record
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    /// Create a new JSON handler
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: &Event) {
        // Events stay on one line so the stream can be consumed line by line
        if let Ok(s) = serde_json::to_string(event) {
            println!("{}", s);
        }
    }

    fn info(&self, message: &str) {
        #[derive(Serialize)]
        struct Info<'a> {
            info: &'a str,
        }

        self.print_json(&Info { info: message });
    }

    fn result(&self, record: &ExecutionRecord) {
        self.print_json(record);
    }
}

/// Quiet handler that only prints the final output
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: &Event) {}

    fn info(&self, _message: &str) {}

    fn result(&self, record: &ExecutionRecord) {
        match &record.output {
            Value::Null => {}
            Value::String(s) => println!("{}", s),
            other => println!("{}", other),
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Arc<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Arc::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Arc::new(JsonHandler::new(false)),
        OutputMode::Quiet => Arc::new(QuietHandler),
    }
}
