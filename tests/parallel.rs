mod common;

use common::{Counter, engine, registry};
use flowmux::engine::{
    AbandonPolicy, BranchStatus, ExecutionRequest, ExecutionStatus, FailureKind,
};
use flowmux::events::{EventType, MemorySink};
use flowmux::graph::{Edge, Graph, Node, NodeType};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// start -> p -> {a, b, c} -> join -> end
fn race(aggregation: &str, delays: [u64; 3]) -> Graph {
    let mut graph = Graph::new("race")
        .with_node(Node::new("start", NodeType::Start))
        .with_node(Node::new("p", NodeType::Parallel).with_config("aggregation", aggregation))
        .with_node(Node::new("join", "sleepy"))
        .with_node(Node::new("end", NodeType::End))
        .with_edge(Edge::new("start", "p"))
        .with_edge(Edge::new("join", "end"));

    for (id, delay) in ["a", "b", "c"].into_iter().zip(delays) {
        graph = graph
            .with_node(
                Node::new(id, "sleepy")
                    .with_config("delay_ms", delay)
                    .with_config("value", id),
            )
            .with_edge(Edge::new("p", id))
            .with_edge(Edge::new(id, "join"));
    }
    graph
}

fn count(visited: &[&str], id: &str) -> usize {
    visited.iter().filter(|v| **v == id).count()
}

#[tokio::test]
async fn test_any_takes_fastest_branch() {
    let started = Instant::now();
    let record = engine(registry())
        .execute(ExecutionRequest::new(race("any", [1000, 10, 1000]), json!({})))
        .await
        .unwrap();

    assert!(record.is_success());
    assert!(started.elapsed() < Duration::from_millis(800));

    let fan_in = record.fan_in("p").unwrap();
    assert!(fan_in.resolved);
    assert_eq!(fan_in.output, json!("b"));
    let statuses: Vec<BranchStatus> = fan_in.branches.iter().map(|b| b.status).collect();
    assert_eq!(
        statuses,
        vec![BranchStatus::Abandoned, BranchStatus::Succeeded, BranchStatus::Abandoned]
    );

    assert_eq!(record.node_result("join").unwrap().output, json!("b"));
    assert_eq!(count(&record.visited(), "join"), 1);
}

#[tokio::test]
async fn test_all_aggregates_by_branch_head() {
    let record = engine(registry())
        .execute(ExecutionRequest::new(race("all", [30, 10, 20]), json!({})))
        .await
        .unwrap();

    assert!(record.is_success());
    let expected = json!({"a": "a", "b": "b", "c": "c"});
    assert_eq!(record.fan_in("p").unwrap().output, expected);
    assert_eq!(record.node_result("join").unwrap().output, expected);

    let visited = record.visited();
    assert_eq!(count(&visited, "join"), 1);
    assert_eq!(count(&visited, "end"), 1);
}

#[tokio::test]
async fn test_all_fails_with_first_branch_failure() {
    let graph = race("all", [10, 10, 10]);
    let graph = Graph {
        nodes: graph
            .nodes
            .into_iter()
            .map(|node| if node.id == "b" { node.with_config("fail", true) } else { node })
            .collect(),
        ..graph
    };

    let record = engine(registry())
        .execute(ExecutionRequest::new(graph, json!({})))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.node_id.as_deref(), Some("b"));
    assert!(record.node_result("join").is_none());
    assert!(!record.fan_in("p").unwrap().resolved);
}

#[tokio::test]
async fn test_majority() {
    let failing = |ids: &[&str]| {
        let graph = race("majority", [10, 10, 10]);
        Graph {
            nodes: graph
                .nodes
                .into_iter()
                .map(|node| {
                    if ids.contains(&node.id.as_str()) {
                        node.with_config("fail", true).with_config("delay_ms", 0)
                    } else {
                        node
                    }
                })
                .collect(),
            ..graph
        }
    };

    let record = engine(registry())
        .execute(ExecutionRequest::new(failing(&["b"]), json!({})))
        .await
        .unwrap();
    assert!(record.is_success());
    assert_eq!(
        record.node_result("join").unwrap().output,
        json!({"a": "a", "c": "c"})
    );

    let record = engine(registry())
        .execute(ExecutionRequest::new(failing(&["a", "c"]), json!({})))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.node_id.as_deref(), Some("p"));
    assert_eq!(error.kind, FailureKind::NodeExecution);
    assert!(error.message.contains("majority"));
}

#[tokio::test]
async fn test_diamond_join_runs_once() {
    let graph = Graph::new("diamond")
        .with_node(Node::new("start", NodeType::Start))
        .with_node(Node::new("p", NodeType::Parallel))
        .with_node(Node::new("a", "sleepy").with_config("value", "A"))
        .with_node(Node::new("b", "sleepy").with_config("delay_ms", 20))
        .with_node(Node::new("b2", "sleepy").with_config("value", "B2"))
        .with_node(Node::new("join", "sleepy"))
        .with_node(Node::new("end", NodeType::End))
        .with_edge(Edge::new("start", "p"))
        .with_edge(Edge::new("p", "a"))
        .with_edge(Edge::new("p", "b"))
        .with_edge(Edge::new("a", "join"))
        .with_edge(Edge::new("b", "b2"))
        .with_edge(Edge::new("b2", "join"))
        .with_edge(Edge::new("join", "end"));

    let record = engine(registry())
        .execute(ExecutionRequest::new(graph, json!({})))
        .await
        .unwrap();

    assert!(record.is_success());
    let visited = record.visited();
    assert_eq!(count(&visited, "join"), 1);
    assert_eq!(count(&visited, "end"), 1);
    assert_eq!(
        record.node_result("join").unwrap().output,
        json!({"a": "A", "b": "B2"})
    );
}

#[tokio::test]
async fn test_several_satisfied_guards_fan_out() {
    let graph = Graph::new("routes")
        .with_node(Node::new("start", NodeType::Start))
        .with_node(Node::new("r", "sleepy").with_config("value", json!({"score": 9})))
        .with_node(Node::new("x", "sleepy").with_config("value", "x"))
        .with_node(Node::new("y", "sleepy").with_config("value", "y"))
        .with_node(Node::new("z", "sleepy").with_config("value", "z"))
        .with_node(Node::new("end", NodeType::End))
        .with_edge(Edge::new("start", "r"))
        .with_edge(Edge::new("r", "x").with_guard("output.score > 1"))
        .with_edge(Edge::new("r", "y").with_guard("output.score > 5"))
        .with_edge(Edge::new("r", "z").with_guard("output.score > 100"))
        .with_edge(Edge::new("x", "end"))
        .with_edge(Edge::new("y", "end"))
        .with_edge(Edge::new("z", "end"));

    let record = engine(registry())
        .execute(ExecutionRequest::new(graph, json!({})))
        .await
        .unwrap();

    assert!(record.is_success());
    let fan_in = record.fan_in("r").unwrap();
    let heads: Vec<&str> = fan_in.branches.iter().map(|b| b.head.as_str()).collect();
    assert_eq!(heads, vec!["x", "y"]);
    assert!(record.node_result("z").is_none());
    assert_eq!(count(&record.visited(), "end"), 1);
}

#[tokio::test]
async fn test_abandon_policy() {
    // a -> a2 keeps going after `any` resolves unless the branch is stopped
    let run = |policy: AbandonPolicy| async move {
        let counter = Counter::new(0);
        let mut registry = registry();
        registry.register_arc("count", counter.clone());

        let graph = race("any", [200, 10, 200]);
        let graph = Graph {
            edges: graph
                .edges
                .into_iter()
                .filter(|edge| !(edge.source == "a" && edge.target == "join"))
                .collect(),
            ..graph
        }
        .with_node(Node::new("a2", "count"))
        .with_edge(Edge::new("a", "a2"))
        .with_edge(Edge::new("a2", "join"));

        let record = engine(registry)
            .execute(ExecutionRequest::new(graph, json!({})).with_abandon(policy))
            .await
            .unwrap();
        assert!(record.is_success());

        tokio::time::sleep(Duration::from_millis(500)).await;
        counter.calls()
    };

    assert_eq!(run(AbandonPolicy::Detach).await, 1);
    assert_eq!(run(AbandonPolicy::Stop).await, 0);
}

#[tokio::test]
async fn test_parallel_events_pair_up() {
    let sink = Arc::new(MemorySink::new());
    engine(registry())
        .with_sink(sink.clone())
        .execute(ExecutionRequest::new(race("all", [10, 5, 1]), json!({})))
        .await
        .unwrap();

    let events = sink.events();
    let of = |event_type: EventType| {
        let mut ids: Vec<String> = events
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter_map(|e| e.node_id.clone())
            .collect();
        ids.sort();
        ids
    };
    assert_eq!(of(EventType::NodeStarted), of(EventType::NodeCompleted));
    assert_eq!(of(EventType::NodeStarted).len(), 7);

    let terminal: Vec<_> = events.iter().filter(|e| e.event_type.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::WorkflowCompleted);
    assert_eq!(events.first().unwrap().event_type, EventType::WorkflowStarted);
}
