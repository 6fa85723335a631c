//! Execution results: per-node results, fan-in summaries and the final record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl ExecutionStatus {
    /// True once the execution can no longer change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::TimedOut => "timeout",
        };
        f.write_str(s)
    }
}

/// Why a node or an execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No executor registered for the node type
    ExecutorNotFound,
    /// The executor reported an error
    NodeExecution,
    /// The node's own timeout expired
    NodeTimeout,
    /// The workflow deadline expired
    WorkflowTimeout,
    /// Cooperative cancellation
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line attached to a node result
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }
}

/// Result of running one node, after retries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_type: String,
    pub success: bool,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
}

impl NodeExecutionResult {
    pub fn success(node_id: &str, node_type: &str, output: Value) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            success: true,
            output,
            error: None,
            error_kind: None,
            logs: Vec::new(),
            duration_ms: 0,
            retry_count: 0,
            started_at: Utc::now(),
        }
    }

    pub fn failure(node_id: &str, node_type: &str, kind: FailureKind, error: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            success: false,
            output: Value::Null,
            error: Some(error),
            error_kind: Some(kind),
            logs: Vec::new(),
            duration_ms: 0,
            retry_count: 0,
            started_at: Utc::now(),
        }
    }

    /// Number of executor invocations
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Terminal error of an execution
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutionFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl ExecutionFailure {
    /// Failure derived from a node result
    pub fn from_node(result: &NodeExecutionResult) -> Self {
        Self {
            node_id: Some(result.node_id.clone()),
            kind: result.error_kind.unwrap_or(FailureKind::NodeExecution),
            message: result.error.clone().unwrap_or_default(),
            attempts: result.attempts(),
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(
                f,
                "node '{}' failed: {} [attempts: {}]",
                node, self.message, self.attempts
            ),
            None => f.write_str(&self.message),
        }
    }
}

/// Branch aggregation policy of a parallel node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Wait for every branch
    #[default]
    All,
    /// Resolve on the first successful branch
    Any,
    /// Resolve once more than half succeeded, or a majority became impossible
    Majority,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            "majority" => Some(Self::Majority),
            _ => None,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aggregation::All => "all",
            Aggregation::Any => "any",
            Aggregation::Majority => "majority",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Succeeded,
    Failed,
    Cancelled,
    #[serde(rename = "timeout")]
    TimedOut,
    /// Still running when the fan-in resolved; not awaited
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BranchRecord {
    /// First node of the branch
    pub head: String,
    pub status: BranchStatus,
}

/// How a fan-out point was resolved
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FanInRecord {
    pub node_id: String,
    pub aggregation: Aggregation,
    pub resolved: bool,
    pub branches: Vec<BranchRecord>,
    /// Winning branch output for `any`, otherwise outputs keyed by branch head
    pub output: Value,
}

/// Final record returned for every execution
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub node_results: Vec<NodeExecutionResult>,
    #[serde(default)]
    pub fan_ins: Vec<FanInRecord>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Result of a node, if it ran
    pub fn node_result(&self, node_id: &str) -> Option<&NodeExecutionResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }

    /// Node ids in the order their results were recorded
    pub fn visited(&self) -> Vec<&str> {
        self.node_results.iter().map(|r| r.node_id.as_str()).collect()
    }

    /// Ids of nodes that failed
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.node_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.node_id.as_str())
            .collect()
    }

    /// Fan-in summary of a parallel node
    pub fn fan_in(&self, node_id: &str) -> Option<&FanInRecord> {
        self.fan_ins.iter().find(|f| f.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::TimedOut).unwrap(),
            json!("timeout")
        );
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Completed).unwrap(),
            json!("completed")
        );
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_failure_from_node_result() {
        let mut result = NodeExecutionResult::failure(
            "fetch",
            "tool",
            FailureKind::NodeExecution,
            "connection refused".into(),
        );
        result.retry_count = 2;

        let failure = ExecutionFailure::from_node(&result);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.node_id.as_deref(), Some("fetch"));

        let display = failure.to_string();
        assert!(display.contains("fetch"));
        assert!(display.contains("connection refused"));
        assert!(display.contains("attempts: 3"));
    }

    #[test]
    fn test_aggregation_parse() {
        assert_eq!(Aggregation::parse("ANY"), Some(Aggregation::Any));
        assert_eq!(Aggregation::parse("majority"), Some(Aggregation::Majority));
        assert_eq!(Aggregation::parse("most"), None);
        assert_eq!(Aggregation::default(), Aggregation::All);
    }

    #[test]
    fn test_record_helpers() {
        let record = ExecutionRecord {
            execution_id: "e".into(),
            workflow_id: "w".into(),
            status: ExecutionStatus::Failed,
            output: Value::Null,
            error: None,
            node_results: vec![
                NodeExecutionResult::success("start", "start", json!({})),
                NodeExecutionResult::failure("a", "tool", FailureKind::NodeTimeout, "slow".into()),
            ],
            fan_ins: Vec::new(),
            variables: Map::new(),
            started_at: Utc::now(),
            total_duration_ms: 5,
        };

        assert!(!record.is_success());
        assert_eq!(record.visited(), vec!["start", "a"]);
        assert_eq!(record.failed_nodes(), vec!["a"]);
        assert!(record.node_result("a").is_some());
        assert!(record.fan_in("a").is_none());
    }
}
