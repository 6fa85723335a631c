//! Tree-walking evaluator

use super::parser::{CompareOp, Expr, Segment};
use super::{ConditionError, Scope};
use serde_json::Value;
use std::cmp::Ordering;

pub(crate) fn eval<S: Scope + ?Sized>(expr: &Expr, scope: &S) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path { root, segments } => {
            let base = scope
                .root(root)
                .ok_or_else(|| ConditionError::UnknownRoot { name: root.clone() })?;
            Ok(walk(&base, segments))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::Neg(inner) => {
            let value = eval(inner, scope)?;
            match value.as_f64() {
                Some(n) => Ok(serde_json::Number::from_f64(-n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)),
                None => Err(ConditionError::TypeMismatch {
                    op: "-".into(),
                    left: kind(&value).into(),
                    right: "nothing".into(),
                }),
            }
        }
        Expr::And(left, right) => {
            if !truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Compare { op, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
    }
}

/// Follow a dotted path; any missing step yields null
fn walk(base: &Value, segments: &[Segment]) -> Value {
    let mut current = base;
    for segment in segments {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx),
            (Segment::Index(idx), Value::Object(map)) => map.get(&idx.to_string()),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    let wanted: &[Ordering] = match op {
        CompareOp::Eq => return Ok(loosely_equal(left, right)),
        CompareOp::Ne => return Ok(!loosely_equal(left, right)),
        CompareOp::Lt => &[Ordering::Less],
        CompareOp::Le => &[Ordering::Less, Ordering::Equal],
        CompareOp::Gt => &[Ordering::Greater],
        CompareOp::Ge => &[Ordering::Greater, Ordering::Equal],
    };

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    let Some(ordering) = ordering else {
        return Err(ConditionError::TypeMismatch {
            op: op.symbol().into(),
            left: kind(left).into(),
            right: kind(right).into(),
        });
    };

    Ok(wanted.contains(&ordering))
}

/// Numbers compare by value (so `1 == 1.0`), everything else structurally
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
