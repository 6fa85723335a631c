//! Custom template filters

use minijinja::value::Value;
use minijinja::{Error, ErrorKind, State};

pub fn register_filters(env: &mut minijinja::Environment) {
    env.add_filter("shell_escape", filter_shell_escape);
    env.add_filter("json", filter_json);
}

/// Quote a value for interpolation into an `sh -c` command
///
/// Plain words pass through; anything else is single-quoted with embedded
/// quotes rewritten as `'\''`.
fn filter_shell_escape(_state: &State, value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='));
    if plain {
        return Ok(Value::from(s));
    }
    Ok(Value::from(format!("'{}'", s.replace('\'', "'\\''"))))
}

/// Serialize a value to compact JSON
fn filter_json(_state: &State, value: Value) -> Result<Value, Error> {
    serde_json::to_string(&value)
        .map(Value::from)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("JSON serialization failed: {}", e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Environment;

    fn render(template: &str, ctx: serde_json::Value) -> String {
        let mut env = Environment::new();
        register_filters(&mut env);
        env.render_str(template, ctx).unwrap()
    }

    #[test]
    fn test_shell_escape_plain_word() {
        let out = render("{{ v | shell_escape }}", serde_json::json!({"v": "src/main.rs"}));
        assert_eq!(out, "src/main.rs");
    }

    #[test]
    fn test_shell_escape_quotes() {
        let out = render("{{ v | shell_escape }}", serde_json::json!({"v": "it's here"}));
        assert_eq!(out, "'it'\\''s here'");
    }

    #[test]
    fn test_shell_escape_empty() {
        let out = render("{{ v | shell_escape }}", serde_json::json!({"v": ""}));
        assert_eq!(out, "''");
    }

    #[test]
    fn test_json_filter() {
        let out = render(
            "{{ v | json }}",
            serde_json::json!({"v": {"items": [1, 2]}}),
        );
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, serde_json::json!({"items": [1, 2]}));
    }
}
