//! HTTP request tool

use super::Tool;
use crate::executor::ExecutorError;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Sends an HTTP request built from templates
///
/// `url` and header values are rendered against `{args}`. For methods other
/// than GET and HEAD the arguments are sent as the JSON body. Output is
/// `{"status", "body"}` with the body parsed as JSON when possible.
pub struct HttpTool {
    name: String,
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
    templates: TemplateEngine,
}

impl HttpTool {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: Method::GET,
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
            templates: TemplateEngine::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Map a non-success status to an executor error
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ExecutorError {
        let message = format!("HTTP {}: {}", status, body);
        match status.as_u16() {
            408 | 429 | 500..=599 => ExecutorError::failed(message),
            _ => ExecutorError::permanent(message),
        }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    async fn call(&self, args: &Value) -> Result<Value, ExecutorError> {
        let start = Instant::now();
        let scope = json!({ "args": args });
        let url = self.templates.render(&self.url, &scope)?;

        let mut request = self
            .client
            .request(self.method.clone(), &url)
            .timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), self.templates.render(value, &scope)?);
        }
        if self.method != Method::GET && self.method != Method::HEAD && !args.is_null() {
            request = request.json(args);
        }

        tracing::debug!(tool = %self.name, method = %self.method, url = %url, "Sending request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout {
                    elapsed: start.elapsed(),
                }
            } else if e.is_builder() {
                ExecutorError::permanent(format!("invalid request: {}", e))
            } else {
                ExecutorError::failed(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({
            "status": status.as_u16(),
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned response and hand back the raw request
    async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            l.to_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            tx.send(String::from_utf8_lossy(&raw).to_string()).ok();
        });

        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_http_tool_get_renders_url() {
        let (base, request) = serve_once("200 OK", r#"{"open": 3}"#).await;
        let tool = HttpTool::new("issues", format!("{}/repos/{{{{ args.repo }}}}/issues", base))
            .with_header("X-Trace", "{{ args.trace }}");

        let result = tool
            .call(&json!({"repo": "flowmux", "trace": "abc"}))
            .await
            .unwrap();
        assert_eq!(result["status"], 200);
        assert_eq!(result["body"]["open"], 3);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("GET /repos/flowmux/issues"));
        assert!(raw.to_lowercase().contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn test_http_tool_post_sends_json() {
        let (base, request) = serve_once("201 Created", r#"{"id": 9}"#).await;
        let tool = HttpTool::new("create", format!("{}/items", base)).with_method(Method::POST);

        let result = tool.call(&json!({"title": "new"})).await.unwrap();
        assert_eq!(result["status"], 201);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /items"));
        assert!(raw.contains(r#"{"title":"new"}"#));
    }

    #[tokio::test]
    async fn test_http_tool_server_error_is_retryable() {
        let (base, _request) = serve_once("503 Service Unavailable", "{}").await;
        let tool = HttpTool::new("flaky", base);

        let err = tool.call(&Value::Null).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_tool_client_error_is_permanent() {
        let (base, _request) = serve_once("404 Not Found", r#"{"error": "missing"}"#).await;
        let tool = HttpTool::new("missing", base);

        let err = tool.call(&Value::Null).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(HttpTool::map_http_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(HttpTool::map_http_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!HttpTool::map_http_error(StatusCode::UNAUTHORIZED, "").is_retryable());
    }
}
