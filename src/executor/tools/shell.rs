//! Shell command tool

use super::Tool;
use crate::executor::ExecutorError;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Runs a command through `sh -c`
///
/// The command is a template rendered against `{args}`; use the
/// `shell_escape` filter for values that may contain spaces or quotes.
/// Output is `{"stdout", "stderr", "exit_code"}` plus `data` when stdout is
/// a JSON document.
pub struct ShellTool {
    name: String,
    command: String,
    description: String,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    templates: TemplateEngine,
}

impl ShellTool {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            description: String::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(300),
            templates: TemplateEngine::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        if self.description.is_empty() {
            format!("sh -c {}", self.command)
        } else {
            self.description.clone()
        }
    }

    async fn call(&self, args: &Value) -> Result<Value, ExecutorError> {
        let start = Instant::now();
        let command = self.templates.render(&self.command, &json!({ "args": args }))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(tool = %self.name, command = %command, "Running shell tool");

        let child = cmd
            .spawn()
            .map_err(|e| ExecutorError::permanent(format!("failed to spawn: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecutorError::failed(format!("failed to wait: {}", e))),
            Err(_) => {
                return Err(ExecutorError::Timeout {
                    elapsed: start.elapsed(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("command exited with code {:?}", output.status.code())
            } else {
                stderr
            };
            return Err(ExecutorError::permanent(message));
        }

        let mut result = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        });
        if let Ok(data) = serde_json::from_str::<Value>(&stdout) {
            result["data"] = data;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_tool_runs_command() {
        let tool = ShellTool::new("greet", "echo hello {{ args.name }}");
        let result = tool.call(&json!({"name": "world"})).await.unwrap();
        assert_eq!(result["stdout"], "hello world");
        assert_eq!(result["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_shell_tool_escapes_args() {
        let tool = ShellTool::new("say", "printf '%s' {{ args.text | shell_escape }}");
        let result = tool.call(&json!({"text": "it's a test"})).await.unwrap();
        assert_eq!(result["stdout"], "it's a test");
    }

    #[tokio::test]
    async fn test_shell_tool_parses_json_stdout() {
        let tool = ShellTool::new("json", r#"echo '{"count": 3}'"#);
        let result = tool.call(&Value::Null).await.unwrap();
        assert_eq!(result["data"]["count"], 3);
    }

    #[tokio::test]
    async fn test_shell_tool_failure() {
        let tool = ShellTool::new("fail", "echo broken >&2; exit 3");
        let err = tool.call(&Value::Null).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Failed { retryable: false, .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_shell_tool_timeout() {
        let tool = ShellTool::new("slow", "sleep 10").with_timeout(Duration::from_millis(100));
        let result = tool.call(&Value::Null).await;
        assert!(matches!(result, Err(ExecutorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_shell_tool_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new("pwd", "pwd").with_working_dir(dir.path());
        let result = tool.call(&Value::Null).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let actual = std::path::PathBuf::from(result["stdout"].as_str().unwrap())
            .canonicalize()
            .unwrap();
        assert_eq!(actual, expected);
    }
}
