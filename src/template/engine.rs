//! Template engine for rendering node configuration

use super::errors::TemplateError;
use super::filters;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::Value;

/// Root names available to templates
pub const ROOTS: &[&str] = &["input", "variables", "nodes", "output"];

/// Template rendering engine
///
/// Wraps minijinja with custom filters and strict undefined handling.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        filters::register_filters(&mut env);
        Self { env }
    }

    /// True when the string contains template syntax
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a template string against a JSON scope
    pub fn render(&self, template: &str, scope: &Value) -> Result<String, TemplateError> {
        self.env
            .render_str(template, scope)
            .map_err(|e| convert_minijinja_error(e, template))
    }

    /// Render every templated string inside a JSON value
    ///
    /// Objects and arrays are walked recursively; non-string leaves and
    /// strings without template syntax are returned unchanged.
    pub fn render_value(&self, value: &Value, scope: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) if Self::is_template(s) => self.render(s, scope).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.render_value(v, scope)?)))
                .collect::<Result<serde_json::Map<_, _>, TemplateError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    /// Check that a template parses
    pub fn validate(&self, template: &str) -> Result<(), TemplateError> {
        self.env
            .template_from_str(template)
            .map(|_| ())
            .map_err(|e| TemplateError::syntax(e.to_string(), e.line().unwrap_or(0)))
    }
}

fn convert_minijinja_error(err: minijinja::Error, template: &str) -> TemplateError {
    let line = err.line().unwrap_or(0);
    match err.kind() {
        ErrorKind::UndefinedError => {
            let name = err
                .range()
                .and_then(|range| template.get(range))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            TemplateError::undefined_variable(name, line, ROOTS)
        }
        ErrorKind::SyntaxError => TemplateError::syntax(err.to_string(), line),
        _ => TemplateError::render(err.to_string()),
    }
}
