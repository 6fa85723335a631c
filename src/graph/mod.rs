//! Workflow graph model
//!
//! A graph is an ordered set of typed nodes and directed edges, optionally
//! guarded by condition expressions. Graphs are loaded once per execution
//! request and are read-only while the engine walks them.
//!
//! # Example
//!
//! ```
//! use flowmux::graph::{Edge, Graph, Node, NodeType, validate};
//!
//! let graph = Graph::new("hello")
//!     .with_node(Node::new("start", NodeType::Start))
//!     .with_node(Node::new("end", NodeType::End))
//!     .with_edge(Edge::new("start", "end"));
//!
//! assert!(validate(&graph).is_ok());
//! ```

mod model;
mod validate;

pub use model::{Edge, Graph, Node, NodeType, RetrySpec};
pub use validate::{GraphValidationError, validate};
