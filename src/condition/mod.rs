//! Guard expression evaluation for edge selection
//!
//! Evaluates expressions like `output.score > 0.5 && variables.mode == 'strict'`
//! against a node's output and the workflow variables.
//!
//! Supports:
//! - Field access: `output.label`, `variables.retries`, `nodes.fetch.items.0`
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Boolean: `&&`, `||`, `!`
//! - Literals: `'string'`, `"string"`, numbers, `true`, `false`, `null`
//! - Parentheses: `(expr)`
//!
//! There are no function calls and no loops, so evaluation is a single pass
//! over a tree whose size is bounded by [`MAX_EXPRESSION_LEN`].

mod eval;
mod lexer;
mod parser;

use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

pub use parser::MAX_DEPTH;

/// Longest accepted expression, in bytes
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Errors while parsing or evaluating a guard expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("expression is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("unexpected {found} at {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("expression nested deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("unknown root '{name}' (expected output, variables, input or nodes)")]
    UnknownRoot { name: String },

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },
}

/// Values an expression can reference by root name
pub trait Scope {
    /// Resolve a root identifier; `None` means the root is unknown
    fn root(&self, name: &str) -> Option<Cow<'_, Value>>;
}

impl Scope for Value {
    fn root(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.get(name).map(Cow::Borrowed)
    }
}

impl Scope for Map<String, Value> {
    fn root(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.get(name).map(Cow::Borrowed)
    }
}

/// A parsed expression, reusable across evaluations
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: parser::Expr,
}

impl Condition {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ConditionError::TooLong {
                len: source.len(),
                max: MAX_EXPRESSION_LEN,
            });
        }
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(&tokens)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean using truthiness of the result
    pub fn evaluate<S: Scope + ?Sized>(&self, scope: &S) -> Result<bool, ConditionError> {
        eval::eval(&self.expr, scope).map(|v| eval::truthy(&v))
    }
}

/// Evaluate an expression, surfacing parse and evaluation errors
///
/// An empty expression is always true.
pub fn try_evaluate<S: Scope + ?Sized>(expr: &str, scope: &S) -> Result<bool, ConditionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(true);
    }
    Condition::parse(expr)?.evaluate(scope)
}

/// Evaluate an expression, failing closed
///
/// A malformed expression or a type error logs a warning and yields `false`,
/// so a broken guard never selects an edge.
pub fn evaluate<S: Scope + ?Sized>(expr: &str, scope: &S) -> bool {
    match try_evaluate(expr, scope) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                expression = expr,
                error = %e,
                "Guard evaluation failed, treating as false"
            );
            false
        }
    }
}

/// Evaluate an optional guard; absent guards are true
pub fn guard_allows<S: Scope + ?Sized>(guard: Option<&str>, scope: &S) -> bool {
    match guard {
        None => true,
        Some(expr) => evaluate(expr, scope),
    }
}
