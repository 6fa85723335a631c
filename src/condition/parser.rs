//! Recursive-descent parser producing the expression tree

use super::ConditionError;
use super::lexer::{Spanned, Token};
use serde_json::Value;

/// Maximum nesting of parentheses and unary operators
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Path { root: String, segments: Vec<Segment> },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

pub(crate) fn parse(tokens: &[Spanned]) -> Result<Expr, ConditionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(extra) => Err(ConditionError::UnexpectedToken {
            found: describe(&extra.token),
            pos: extra.pos,
        }),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.unary()?;

        let op = match self.peek().map(|s| &s.token) {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.unary()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.eat(&Token::Minus) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let Some(spanned) = self.next().cloned() else {
            return Err(ConditionError::UnexpectedEnd);
        };

        match spanned.token {
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Num(n) => Ok(Expr::Literal(number(n))),
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                if !self.eat(&Token::RParen) {
                    return Err(match self.peek() {
                        Some(s) => ConditionError::UnexpectedToken {
                            found: describe(&s.token),
                            pos: s.pos,
                        },
                        None => ConditionError::UnexpectedEnd,
                    });
                }
                Ok(inner)
            }
            Token::Ident(root) => self.path(root),
            other => Err(ConditionError::UnexpectedToken {
                found: describe(&other),
                pos: spanned.pos,
            }),
        }
    }

    fn path(&mut self, root: String) -> Result<Expr, ConditionError> {
        let mut segments = Vec::new();
        while self.eat(&Token::Dot) {
            let Some(spanned) = self.next().cloned() else {
                return Err(ConditionError::UnexpectedEnd);
            };
            let segment = match spanned.token {
                Token::Ident(key) => Segment::Key(key),
                // Keywords are valid field names after a dot
                Token::True => Segment::Key("true".into()),
                Token::False => Segment::Key("false".into()),
                Token::Null => Segment::Key("null".into()),
                Token::Num(n) if n.fract() == 0.0 && n >= 0.0 => Segment::Index(n as usize),
                other => {
                    return Err(ConditionError::UnexpectedToken {
                        found: describe(&other),
                        pos: spanned.pos,
                    });
                }
            };
            segments.push(segment);
        }
        Ok(Expr::Path { root, segments })
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Str(s) => format!("string '{}'", s),
        Token::Num(n) => format!("number {}", n),
        Token::True => "'true'".into(),
        Token::False => "'false'".into(),
        Token::Null => "'null'".into(),
        Token::Dot => "'.'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Not => "'!'".into(),
        Token::Minus => "'-'".into(),
        Token::And => "'&&'".into(),
        Token::Or => "'||'".into(),
        Token::Eq => "'=='".into(),
        Token::Ne => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::Le => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::Ge => "'>='".into(),
    }
}
