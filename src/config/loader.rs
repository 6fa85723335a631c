//! Configuration loading with multi-layer merge

use super::{AgentConfig, ConfigError, ToolConfig};
use crate::engine::{AbandonPolicy, EngineSettings, RetryPolicy};
use crate::executor::{AgentExecutor, ExecutorRegistry, ToolExecutor, ToolSet};
use crate::graph::{self, Graph};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level flowmux configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Agent backends
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,

    /// Tools callable from tool nodes
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

/// Global default settings; unset values fall back to the engine defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Workflow timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Retries for nodes without their own retry block
    pub max_retries: Option<u32>,

    pub retry_base_delay_ms: Option<u64>,

    pub retry_max_delay_ms: Option<u64>,

    /// Add up to 25% random jitter to backoff delays
    pub retry_jitter: Option<bool>,

    pub continue_on_error: Option<bool>,

    /// What happens to branches a fan-in no longer waits for
    pub abandon: Option<AbandonPolicy>,

    /// Agent used when a node names none
    pub agent: Option<String>,
}

impl EngineConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/flowmux/config.toml
    /// 3. .flowmux/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".flowmux/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".flowmux/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/flowmux/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flowmux/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        let defaults = other.defaults;
        if defaults.timeout_ms.is_some() {
            self.defaults.timeout_ms = defaults.timeout_ms;
        }
        if defaults.max_retries.is_some() {
            self.defaults.max_retries = defaults.max_retries;
        }
        if defaults.retry_base_delay_ms.is_some() {
            self.defaults.retry_base_delay_ms = defaults.retry_base_delay_ms;
        }
        if defaults.retry_max_delay_ms.is_some() {
            self.defaults.retry_max_delay_ms = defaults.retry_max_delay_ms;
        }
        if defaults.retry_jitter.is_some() {
            self.defaults.retry_jitter = defaults.retry_jitter;
        }
        if defaults.continue_on_error.is_some() {
            self.defaults.continue_on_error = defaults.continue_on_error;
        }
        if defaults.abandon.is_some() {
            self.defaults.abandon = defaults.abandon;
        }
        if defaults.agent.is_some() {
            self.defaults.agent = defaults.agent;
        }

        // Other wins for the same name
        self.agents.extend(other.agents);
        self.tools.extend(other.tools);
    }

    /// Engine defaults described by `[defaults]`
    pub fn to_settings(&self) -> EngineSettings {
        let base = RetryPolicy::default();
        let d = &self.defaults;
        EngineSettings {
            retry: RetryPolicy {
                max_retries: d.max_retries.unwrap_or(base.max_retries),
                base_delay: d
                    .retry_base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.base_delay),
                max_delay: d
                    .retry_max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.max_delay),
                jitter: d.retry_jitter.unwrap_or(base.jitter),
            },
            timeout: d.timeout_ms.map(Duration::from_millis),
            continue_on_error: d.continue_on_error.unwrap_or(false),
            abandon: d.abandon.unwrap_or_default(),
        }
    }

    /// Enabled agents, by name
    pub fn enabled_agents(&self) -> impl Iterator<Item = (&String, &AgentConfig)> {
        self.agents.iter().filter(|(_, a)| a.enabled)
    }

    /// Built-in executors plus the configured agents and tools
    pub fn build_registry(&self) -> Result<ExecutorRegistry, ConfigError> {
        let mut registry = ExecutorRegistry::with_builtins();

        let mut agents = AgentExecutor::new();
        for (name, agent) in self.enabled_agents() {
            agents = agents.with_backend(Arc::new(agent.to_backend(name)));
        }
        if let Some(name) = &self.defaults.agent {
            if !agents.names().contains(&name.as_str()) {
                return Err(ConfigError::UnknownAgent { name: name.clone() });
            }
            agents = agents.with_default(name.clone());
        }
        if !agents.names().is_empty() {
            registry = registry.with_agents(agents);
        }

        if !self.tools.is_empty() {
            let mut tools = ToolSet::new();
            for (name, tool) in &self.tools {
                tools.register(tool.to_tool(name)?);
            }
            registry = registry.with_tools(ToolExecutor::new(tools));
        }

        Ok(registry)
    }
}

/// Load and validate a graph
///
/// `name_or_path` is either a file path (`~` is expanded) or a graph name.
/// Names are searched, first match wins:
/// 1. .flowmux/graphs/{name}.toml, then .json (project)
/// 2. ~/.config/flowmux/graphs/{name}.toml, then .json (user)
pub fn load_graph(name_or_path: &str, project_dir: Option<&Path>) -> Result<Graph> {
    let expanded = shellexpand::tilde(name_or_path);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_file() {
        return load_graph_file(&path);
    }

    let project_dir = project_dir
        .map(|p| p.join(".flowmux/graphs"))
        .unwrap_or_else(|| PathBuf::from(".flowmux/graphs"));
    let user_dir = dirs::config_dir().map(|p| p.join("flowmux/graphs"));

    let mut searched = Vec::new();
    for dir in std::iter::once(project_dir).chain(user_dir) {
        for ext in ["toml", "json"] {
            let candidate = dir.join(format!("{}.{}", name_or_path, ext));
            if candidate.is_file() {
                return load_graph_file(&candidate);
            }
            searched.push(candidate);
        }
    }

    Err(ConfigError::GraphNotFound {
        name: name_or_path.to_string(),
        searched,
    }
    .into())
}

/// Parse a graph file by extension and validate it
pub fn load_graph_file(path: &Path) -> Result<Graph> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut graph: Graph = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
        }
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }
            .into());
        }
    };

    for edge in graph.edges.iter_mut().filter(|e| e.id.is_empty()) {
        edge.id = format!("{}->{}", edge.source, edge.target);
    }

    graph::validate(&graph).with_context(|| format!("validating {}", path.display()))?;
    tracing::debug!(path = %path.display(), graph = %graph.id, "Loaded graph");

    Ok(graph)
}
