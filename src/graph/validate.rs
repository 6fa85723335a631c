//! Structural validation run once before execution

use super::model::{Graph, NodeType};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Graph structure errors, fatal before any node runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphValidationError {
    #[error("duplicate node id '{id}'")]
    DuplicateNode { id: String },

    #[error("edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },

    #[error("graph has no start node")]
    MissingStart,

    #[error("graph has more than one start candidate: {candidates:?}")]
    AmbiguousStart { candidates: Vec<String> },

    #[error("start node '{id}' has incoming edges")]
    StartHasIncoming { id: String },

    #[error("graph has no end node (every node has outgoing edges)")]
    MissingEnd,

    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Validate a graph
///
/// Checks, in order: duplicate ids, dangling edges, a single unambiguous start
/// node, at least one end node, and cycles reachable from the start node.
pub fn validate(graph: &Graph) -> Result<(), GraphValidationError> {
    let mut ids = HashSet::new();
    for node in &graph.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(GraphValidationError::DuplicateNode {
                id: node.id.clone(),
            });
        }
    }

    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                return Err(GraphValidationError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
    }

    let start = find_start(graph)?;

    if graph.end_nodes().is_empty() {
        return Err(GraphValidationError::MissingEnd);
    }

    detect_cycles(graph, start)
}

fn find_start(graph: &Graph) -> Result<&str, GraphValidationError> {
    let tagged: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Start)
        .map(|n| n.id.as_str())
        .collect();

    let start = match tagged.as_slice() {
        [] => return Err(GraphValidationError::MissingStart),
        [only] => *only,
        many => {
            return Err(GraphValidationError::AmbiguousStart {
                candidates: many.iter().map(|s| s.to_string()).collect(),
            });
        }
    };

    if graph.incoming_count(start) > 0 {
        return Err(GraphValidationError::StartHasIncoming {
            id: start.to_string(),
        });
    }

    // Any other root would be a second entry point
    let targets: HashSet<&str> = graph.edges.iter().map(|e| e.target.as_str()).collect();
    let mut roots: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    if roots.len() > 1 {
        roots.sort();
        return Err(GraphValidationError::AmbiguousStart { candidates: roots });
    }

    Ok(start)
}

/// Depth-first search keeping the current path; a node already fully explored
/// is not re-entered, so converging branches are not reported as cycles.
///
/// Iterative, so the depth of the graph is bounded by the heap, not the stack.
fn detect_cycles(graph: &Graph, start: &str) -> Result<(), GraphValidationError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut done: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::from([start]);
    // (node, index of the next outgoing edge to follow)
    let mut path: Vec<(&str, usize)> = vec![(start, 0)];

    while let Some((node, next)) = path.last_mut() {
        let node = *node;
        let target = adjacency
            .get(node)
            .and_then(|targets| targets.get(*next))
            .copied();
        *next += 1;

        let Some(target) = target else {
            path.pop();
            on_path.remove(node);
            done.insert(node);
            continue;
        };
        if done.contains(target) {
            continue;
        }
        if on_path.contains(target) {
            let pos = path.iter().position(|(n, _)| *n == target).unwrap_or(0);
            let mut cycle: Vec<String> = path[pos..].iter().map(|(n, _)| n.to_string()).collect();
            cycle.push(target.to_string());
            return Err(GraphValidationError::Cycle { path: cycle });
        }

        on_path.insert(target);
        path.push((target, 0));
    }

    Ok(())
}
