//! Agent backend configuration

use crate::executor::CommandAgent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A command-line agent, as configured under `[agents.<name>]`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Command to execute
    pub command: String,

    /// Arguments placed before the prompt
    #[serde(default)]
    pub args: Vec<String>,

    /// Whether this agent is registered
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timeout in seconds for one invocation
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional environment variables for the command
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            enabled: true,
            timeout: default_timeout(),
            env: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Build the backend registered under `name`
    pub fn to_backend(&self, name: &str) -> CommandAgent {
        let command = shellexpand::tilde(&self.command).into_owned();
        CommandAgent::new(name, command)
            .with_args(self.args.clone())
            .with_env(self.env.clone())
            .with_timeout(Duration::from_secs(self.timeout))
    }
}
