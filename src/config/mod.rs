//! Configuration types and loading for flowmux

mod agent;
mod error;
mod loader;
mod tool;

pub use agent::AgentConfig;
pub use error::ConfigError;
pub use loader::{Defaults, EngineConfig, load_graph, load_graph_file};
pub use tool::ToolConfig;
