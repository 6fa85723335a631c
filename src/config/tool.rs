//! Tool configuration

use super::ConfigError;
use crate::executor::{HttpTool, ShellTool, Tool};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A tool, as configured under `[tools.<name>]`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolConfig {
    Shell {
        /// Command template run through `sh -c`
        command: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Seconds
        #[serde(default = "default_shell_timeout")]
        timeout: u64,
    },
    Http {
        /// URL template
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Seconds
        #[serde(default = "default_http_timeout")]
        timeout: u64,
    },
}

fn default_shell_timeout() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

fn default_method() -> String {
    "GET".to_string()
}

impl ToolConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolConfig::Shell { .. } => "shell",
            ToolConfig::Http { .. } => "http",
        }
    }

    /// Build the tool registered under `name`
    pub fn to_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ConfigError> {
        match self {
            ToolConfig::Shell {
                command,
                description,
                working_dir,
                env,
                timeout,
            } => {
                let mut tool = ShellTool::new(name, command.clone())
                    .with_env(env.clone())
                    .with_timeout(Duration::from_secs(*timeout));
                if let Some(description) = description {
                    tool = tool.with_description(description.clone());
                }
                if let Some(dir) = working_dir {
                    tool = tool.with_working_dir(shellexpand::tilde(dir).into_owned());
                }
                Ok(Arc::new(tool))
            }
            ToolConfig::Http {
                url,
                method,
                headers,
                timeout,
            } => {
                let method = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|e| {
                    ConfigError::InvalidTool {
                        name: name.to_string(),
                        message: format!("invalid method '{}': {}", method, e),
                    }
                })?;
                let mut tool = HttpTool::new(name, url.clone())
                    .with_method(method)
                    .with_timeout(Duration::from_secs(*timeout));
                for (header, value) in headers {
                    tool = tool.with_header(header.clone(), value.clone());
                }
                Ok(Arc::new(tool))
            }
        }
    }
}
