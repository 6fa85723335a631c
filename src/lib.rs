//! flowmux: directed-graph workflow orchestrator
//!
//! A workflow is a [`graph::Graph`] of typed nodes joined by optionally
//! guarded edges. The [`engine::Engine`] walks the graph from its start node,
//! dispatching each node to the [`executor::NodeExecutor`] registered for its
//! type, retrying failures with exponential backoff, fanning out at parallel
//! nodes and reporting progress through an [`events::EventSink`].

pub mod condition;
pub mod config;
pub mod engine;
pub mod events;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod template;
