//! Condition expression trees: parsing and evaluation.
//!
//! Conditions are plain JSON. An object with a single key is an operator
//! application whose value is the argument list; everything else is a
//! literal. The tree has no loops, calls or mutation, so evaluation is
//! linear in the number of nodes.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use super::context::ConditionContext;
use super::error::ConditionError;
use super::ConditionResult;

/// Maximum nesting depth of a condition tree.
pub const MAX_DEPTH: usize = 32;

/// Maximum number of nodes in a condition tree.
pub const MAX_NODES: usize = 512;

/// Ordering and equality operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
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

/// String and collection predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextOp {
    fn name(self) -> &'static str {
        match self {
            TextOp::Contains => "contains",
            TextOp::StartsWith => "startsWith",
            TextOp::EndsWith => "endsWith",
        }
    }
}

/// A parsed, immutable condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var {
        path: String,
        default: Option<Box<Expr>>,
    },
    Exists(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
    Text {
        op: TextOp,
        target: Box<Expr>,
        argument: Box<Expr>,
    },
}

struct Budget {
    nodes: usize,
}

impl Expr {
    /// Parse a JSON condition into an expression tree.
    ///
    /// # Errors
    ///
    /// Unknown operators, wrong arity and trees exceeding [`MAX_DEPTH`] or
    /// [`MAX_NODES`] are rejected.
    pub fn parse(value: &Value) -> ConditionResult<Self> {
        let mut budget = Budget { nodes: 0 };
        Self::parse_node(value, 0, &mut budget)
    }

    fn parse_node(value: &Value, depth: usize, budget: &mut Budget) -> ConditionResult<Self> {
        if depth >= MAX_DEPTH {
            return Err(ConditionError::TooComplex {
                message: format!("nesting exceeds {MAX_DEPTH}"),
            });
        }
        budget.nodes += 1;
        if budget.nodes > MAX_NODES {
            return Err(ConditionError::TooComplex {
                message: format!("more than {MAX_NODES} nodes"),
            });
        }

        match value {
            Value::Array(items) => Ok(Expr::List(
                items
                    .iter()
                    .map(|item| Self::parse_node(item, depth + 1, budget))
                    .collect::<ConditionResult<_>>()?,
            )),
            Value::Object(map) => {
                if map.len() != 1 {
                    return Err(ConditionError::Malformed {
                        message: format!(
                            "operator object must have exactly one key, found {}",
                            map.len()
                        ),
                    });
                }
                let Some((operator, raw_args)) = map.iter().next() else {
                    return Err(ConditionError::Malformed {
                        message: "empty operator object".to_string(),
                    });
                };
                let args: Vec<&Value> = match raw_args {
                    Value::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                Self::parse_operator(operator, &args, depth, budget)
            }
            scalar => Ok(Expr::Literal(scalar.clone())),
        }
    }

    fn parse_operator(
        operator: &str,
        args: &[&Value],
        depth: usize,
        budget: &mut Budget,
    ) -> ConditionResult<Self> {
        let mut child = |v: &Value| Self::parse_node(v, depth + 1, budget).map(Box::new);

        match operator {
            "var" => {
                let path = match args.first() {
                    Some(Value::String(path)) if !path.is_empty() => path.clone(),
                    _ => {
                        return Err(ConditionError::Malformed {
                            message: "'var' expects a non-empty path string".to_string(),
                        })
                    }
                };
                let default = match args {
                    [_] => None,
                    [_, d] => Some(child(*d)?),
                    _ => return Err(arity(operator, "1 or 2", args.len())),
                };
                Ok(Expr::Var { path, default })
            }
            "exists" => match args {
                [Value::String(path)] => Ok(Expr::Exists(path.clone())),
                [_] => Err(ConditionError::Malformed {
                    message: "'exists' expects a path string".to_string(),
                }),
                _ => Err(arity(operator, "1", args.len())),
            },
            "!" | "not" => match args {
                [inner] => Ok(Expr::Not(child(*inner)?)),
                _ => Err(arity(operator, "1", args.len())),
            },
            "and" | "or" => {
                let children = args
                    .iter()
                    .map(|a| child(*a).map(|boxed| *boxed))
                    .collect::<ConditionResult<Vec<_>>>()?;
                if operator == "and" {
                    Ok(Expr::And(children))
                } else {
                    Ok(Expr::Or(children))
                }
            }
            "==" | "!=" | "<" | "<=" | ">" | ">=" => {
                let op = match operator {
                    "==" => CompareOp::Eq,
                    "!=" => CompareOp::Ne,
                    "<" => CompareOp::Lt,
                    "<=" => CompareOp::Le,
                    ">" => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                match args {
                    [l, r] => Ok(Expr::Compare {
                        op,
                        left: child(*l)?,
                        right: child(*r)?,
                    }),
                    _ => Err(arity(operator, "2", args.len())),
                }
            }
            "in" => match args {
                [n, h] => Ok(Expr::In {
                    needle: child(*n)?,
                    haystack: child(*h)?,
                }),
                _ => Err(arity(operator, "2", args.len())),
            },
            "contains" | "startsWith" | "endsWith" => {
                let op = match operator {
                    "contains" => TextOp::Contains,
                    "startsWith" => TextOp::StartsWith,
                    _ => TextOp::EndsWith,
                };
                match args {
                    [t, a] => Ok(Expr::Text {
                        op,
                        target: child(*t)?,
                        argument: child(*a)?,
                    }),
                    _ => Err(arity(operator, "2", args.len())),
                }
            }
            other => Err(ConditionError::UnknownOperator {
                operator: other.to_string(),
            }),
        }
    }

    /// Evaluate the tree to a JSON value.
    pub fn evaluate(&self, ctx: &ConditionContext) -> ConditionResult<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.evaluate(ctx))
                    .collect::<ConditionResult<_>>()?,
            )),
            Expr::Var { path, default } => match ctx.lookup(path) {
                Some(v) => Ok(v.clone()),
                None => match default {
                    Some(d) => d.evaluate(ctx),
                    None => Err(ConditionError::MissingVariable { path: path.clone() }),
                },
            },
            Expr::Exists(path) => Ok(Value::Bool(
                ctx.lookup(path).is_some_and(|v| !v.is_null()),
            )),
            Expr::Not(inner) => Ok(Value::Bool(!expect_bool("!", &inner.evaluate(ctx)?)?)),
            Expr::And(children) => {
                for c in children {
                    if !expect_bool("and", &c.evaluate(ctx)?)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(children) => {
                for c in children {
                    if expect_bool("or", &c.evaluate(ctx)?)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Compare { op, left, right } => {
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
            Expr::In { needle, haystack } => {
                let n = needle.evaluate(ctx)?;
                let h = haystack.evaluate(ctx)?;
                match (&n, &h) {
                    (_, Value::Array(items)) => Ok(Value::Bool(items.iter().any(|i| loose_eq(&n, i)))),
                    (Value::String(s), Value::String(hay)) => Ok(Value::Bool(hay.contains(s.as_str()))),
                    _ => Err(mismatch("in", "array or string haystack", &h)),
                }
            }
            Expr::Text {
                op,
                target,
                argument,
            } => {
                let t = target.evaluate(ctx)?;
                let a = argument.evaluate(ctx)?;
                text_predicate(*op, &t, &a).map(Value::Bool)
            }
        }
    }

    /// Evaluate the tree and require a boolean result.
    pub fn evaluate_bool(&self, ctx: &ConditionContext) -> ConditionResult<bool> {
        let result = self.evaluate(ctx)?;
        expect_bool("condition", &result)
    }
}

fn arity(operator: &str, expected: &str, actual: usize) -> ConditionError {
    ConditionError::Arity {
        operator: operator.to_string(),
        expected: expected.to_string(),
        actual,
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(operator: &str, expected: &str, actual: &Value) -> ConditionError {
    ConditionError::TypeMismatch {
        operator: operator.to_string(),
        expected: expected.to_string(),
        actual: kind(actual).to_string(),
    }
}

fn expect_bool(operator: &str, v: &Value) -> ConditionResult<bool> {
    v.as_bool().ok_or_else(|| mismatch(operator, "bool", v))
}

pub(crate) fn as_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Equality with numeric normalisation; different kinds are never equal.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

pub(crate) fn compare(op: CompareOp, l: &Value, r: &Value) -> ConditionResult<bool> {
    match op {
        CompareOp::Eq => return Ok(loose_eq(l, r)),
        CompareOp::Ne => return Ok(!loose_eq(l, r)),
        _ => {}
    }
    let ordering = match (l, r) {
        (Value::Number(x), Value::Number(y)) => {
            let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) else {
                return Err(mismatch(op.symbol(), "finite numbers", l));
            };
            x.partial_cmp(&y)
                .ok_or_else(|| mismatch(op.symbol(), "comparable numbers", l))?
        }
        (Value::String(x), Value::String(y)) => match (as_timestamp(x), as_timestamp(y)) {
            (Some(tx), Some(ty)) => tx.cmp(&ty),
            _ => x.cmp(y),
        },
        (Value::Number(_), other) | (Value::String(_), other) => {
            return Err(mismatch(op.symbol(), kind(l), other))
        }
        (other, _) => return Err(mismatch(op.symbol(), "number, string or timestamp", other)),
    };
    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn text_predicate(op: TextOp, target: &Value, argument: &Value) -> ConditionResult<bool> {
    match (op, target, argument) {
        (TextOp::Contains, Value::Array(items), needle) => {
            Ok(items.iter().any(|i| loose_eq(i, needle)))
        }
        (_, Value::String(t), Value::String(a)) => Ok(match op {
            TextOp::Contains => t.contains(a.as_str()),
            TextOp::StartsWith => t.starts_with(a.as_str()),
            TextOp::EndsWith => t.ends_with(a.as_str()),
        }),
        (_, Value::String(_), other) => Err(mismatch(op.name(), "string argument", other)),
        (_, other, _) => Err(mismatch(op.name(), "string target", other)),
    }
}
