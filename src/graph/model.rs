//! Graph, node and edge definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Node type tag - selects the executor for a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// Entry point, passes the workflow input through
    Start,
    /// Terminal node, collects accumulated outputs
    End,
    /// Call an agent backend with a rendered prompt
    Agent,
    /// Invoke a named tool
    Tool,
    /// Pure boolean evaluation
    Condition,
    /// Fan out to every selected successor concurrently
    Parallel,
    /// Sleep for a configured duration
    Delay,
    /// Suspend until an external input signal arrives
    HumanInput,
    /// Executor registered by the embedding application
    Custom(String),
}

impl NodeType {
    /// Tag used in graph files and the executor registry
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Agent => "agent",
            NodeType::Tool => "tool",
            NodeType::Condition => "condition",
            NodeType::Parallel => "parallel",
            NodeType::Delay => "delay",
            NodeType::HumanInput => "human_input",
            NodeType::Custom(tag) => tag,
        }
    }
}

impl From<String> for NodeType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "start" => NodeType::Start,
            "end" => NodeType::End,
            "agent" => NodeType::Agent,
            "tool" => NodeType::Tool,
            "condition" => NodeType::Condition,
            "parallel" => NodeType::Parallel,
            "delay" => NodeType::Delay,
            "human_input" => NodeType::HumanInput,
            _ => NodeType::Custom(tag),
        }
    }
}

impl From<&str> for NodeType {
    fn from(tag: &str) -> Self {
        NodeType::from(tag.to_string())
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node retry settings, as written in a graph file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    /// Number of retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Upper bound for a single backoff delay in milliseconds
    pub max_delay_ms: Option<u64>,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Node {
    /// Node id (unique within the graph)
    pub id: String,

    /// Node type
    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Executor-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Retry policy override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,

    /// Timeout in milliseconds covering every attempt of this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Keep walking the graph if this node fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
}

impl Node {
    /// Create a node with an empty config
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: Map::new(),
            retry: None,
            timeout_ms: None,
            continue_on_error: None,
        }
    }

    /// Set a config value
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the node timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the continue-on-error override
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    /// Get a string config value
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Get an unsigned integer config value
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    /// Edge id
    #[serde(default)]
    pub id: String,

    /// Source node id
    pub source: String,

    /// Target node id
    pub target: String,

    /// Guard expression; absent means always followed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl Edge {
    /// Create an unguarded edge
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            guard: None,
        }
    }

    /// Attach a guard expression
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

/// Workflow graph
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Graph {
    /// Workflow id
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Edges in declaration order
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Create an empty graph
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add a node
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in declaration order
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Number of incoming edges of a node
    pub fn incoming_count(&self, id: &str) -> usize {
        self.edges.iter().filter(|e| e.target == id).count()
    }

    /// The node tagged `start`, if there is exactly one
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self.nodes.iter().filter(|n| n.node_type == NodeType::Start);
        match (starts.next(), starts.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    /// Nodes without outgoing edges
    pub fn end_nodes(&self) -> Vec<&Node> {
        let sources: HashSet<&str> = self.edges.iter().map(|e| e.source.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !sources.contains(n.id.as_str()))
            .collect()
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip_tags() {
        assert_eq!(NodeType::from("human_input"), NodeType::HumanInput);
        assert_eq!(NodeType::from("parallel"), NodeType::Parallel);
        assert_eq!(
            NodeType::from("webhook"),
            NodeType::Custom("webhook".into())
        );
        assert_eq!(String::from(NodeType::Delay), "delay");
    }

    #[test]
    fn test_graph_from_toml() {
        let toml = r#"
            id = "triage"
            name = "Issue triage"

            [[nodes]]
            id = "start"
            type = "start"

            [[nodes]]
            id = "classify"
            type = "agent"
            timeout_ms = 5000
            config = { prompt = "Classify {{ input.title }}" }
            retry = { max_retries = 2, base_delay_ms = 100 }

            [[nodes]]
            id = "end"
            type = "end"

            [[edges]]
            source = "start"
            target = "classify"

            [[edges]]
            source = "classify"
            target = "end"
            guard = "output.label != null"
        "#;

        let graph: Graph = toml::from_str(toml).unwrap();
        assert_eq!(graph.display_name(), "Issue triage");
        assert_eq!(graph.nodes.len(), 3);

        let classify = graph.node("classify").unwrap();
        assert_eq!(classify.node_type, NodeType::Agent);
        assert_eq!(classify.timeout_ms, Some(5000));
        assert_eq!(classify.retry.as_ref().unwrap().max_retries, 2);
        assert_eq!(
            classify.config_str("prompt"),
            Some("Classify {{ input.title }}")
        );
        assert_eq!(
            graph.edges[1].guard.as_deref(),
            Some("output.label != null")
        );
    }

    #[test]
    fn test_graph_from_json() {
        let json = r#"{
            "id": "wf",
            "nodes": [
                {"id": "s", "type": "start"},
                {"id": "e", "type": "end"}
            ],
            "edges": [{"id": "e1", "source": "s", "target": "e"}]
        }"#;

        let graph: Graph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.display_name(), "wf");
        assert_eq!(graph.start_node().unwrap().id, "s");
        assert_eq!(graph.end_nodes().len(), 1);
    }

    #[test]
    fn test_outgoing_preserves_declaration_order() {
        let graph = Graph::new("wf")
            .with_node(Node::new("a", NodeType::Start))
            .with_node(Node::new("b", NodeType::End))
            .with_node(Node::new("c", NodeType::End))
            .with_edge(Edge::new("a", "c"))
            .with_edge(Edge::new("a", "b"));

        let targets: Vec<_> = graph.outgoing("a").map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["c", "b"]);
        assert_eq!(graph.incoming_count("b"), 1);
        assert_eq!(graph.incoming_count("a"), 0);
    }

    #[test]
    fn test_start_node_requires_exactly_one() {
        let graph = Graph::new("wf")
            .with_node(Node::new("a", NodeType::Start))
            .with_node(Node::new("b", NodeType::Start));
        assert!(graph.start_node().is_none());
    }
}
