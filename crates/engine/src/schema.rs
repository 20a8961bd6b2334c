//! Request schema: the per-model conversion table from raw text parameters
//! to typed request values.
//!
//! The schema is derived once when an enforcer is built. Each request
//! attribute gets one [`AttributeKind`], taken from an explicit annotation in
//! the request definition (`age:number`) or inferred from how the matcher uses
//! the attribute.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::error::{EngineError, EngineResult};
use crate::expr::{BinaryOp, Expr, Scope, UnaryOp};
use crate::model::Model;
use crate::value::Value;

/// Optional prefix marking a JSON attribute record parameter.
pub const RECORD_PREFIX: &str = "ABAC::";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    Text,
    Number,
    Boolean,
    Record,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Text => "string",
            AttributeKind::Number => "number",
            AttributeKind::Boolean => "bool",
            AttributeKind::Record => "record",
        }
    }

    /// Parse one raw parameter as this kind.
    pub fn coerce(&self, raw: &str) -> Result<Value, String> {
        match self {
            AttributeKind::Text => Ok(Value::Text(raw.to_string())),
            AttributeKind::Number => match raw.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Value::Number(n)),
                _ => Err(format!("'{raw}' is not a number")),
            },
            AttributeKind::Boolean => {
                let trimmed = raw.trim();
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Value::Bool(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(format!("'{raw}' is not a boolean"))
                }
            }
            AttributeKind::Record => {
                let body = raw.strip_prefix(RECORD_PREFIX).unwrap_or(raw);
                let json: serde_json::Value = serde_json::from_str(body)
                    .map_err(|e| format!("attribute record is not valid JSON: {e}"))?;
                if !json.is_object() {
                    return Err("attribute record must be a JSON object".to_string());
                }
                Value::from_json(json)
            }
        }
    }
}

impl core::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AttributeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "text" | "str" => Ok(AttributeKind::Text),
            "number" | "int" | "float" | "num" => Ok(AttributeKind::Number),
            "bool" | "boolean" => Ok(AttributeKind::Boolean),
            "record" | "object" | "abac" => Ok(AttributeKind::Record),
            other => Err(format!("unknown attribute type '{other}'")),
        }
    }
}

/// Why a parameter list was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("expected {expected} parameters, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("parameter {index} (r.{name}, {kind}): {reason}")]
    Type {
        index: usize,
        name: String,
        kind: AttributeKind,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSchema {
    attributes: Vec<Attribute>,
}

impl RequestSchema {
    /// Derive the schema for a model.
    ///
    /// Fails with `InvalidModel` when the matcher uses an attribute in ways
    /// that imply different kinds (e.g. `r.x > 1 && r.x.Name == "a"`).
    pub fn derive(model: &Model) -> EngineResult<Self> {
        let mut hints: HashMap<String, BTreeSet<AttributeKind>> = HashMap::new();
        infer(model.matcher(), true, &mut hints);

        let mut attributes = Vec::with_capacity(model.request().arity());
        for field in model.request().fields() {
            let kind = match field.kind {
                Some(kind) => kind,
                None => {
                    let inferred = hints.remove(&field.name).unwrap_or_default();
                    let mut iter = inferred.iter();
                    match (iter.next(), iter.next()) {
                        (None, _) => AttributeKind::Text,
                        (Some(kind), None) => *kind,
                        (Some(_), Some(_)) => {
                            let kinds: Vec<&str> = inferred.iter().map(|k| k.as_str()).collect();
                            return Err(EngineError::invalid_model(format!(
                                "r.{} is used as {} in the matcher; annotate it in the request definition",
                                field.name,
                                kinds.join(" and ")
                            )));
                        }
                    }
                }
            };
            attributes.push(Attribute {
                name: field.name.clone(),
                kind,
            });
        }

        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn arity(&self) -> usize {
        self.attributes.len()
    }

    /// Convert raw parameters into call-scoped request values.
    pub fn coerce<S: AsRef<str>>(&self, params: &[S]) -> Result<Vec<Value>, CoercionError> {
        if params.len() != self.attributes.len() {
            return Err(CoercionError::Arity {
                expected: self.attributes.len(),
                found: params.len(),
            });
        }

        self.attributes
            .iter()
            .zip(params)
            .enumerate()
            .map(|(index, (attr, raw))| {
                attr.kind
                    .coerce(raw.as_ref())
                    .map_err(|reason| CoercionError::Type {
                        index,
                        name: attr.name.clone(),
                        kind: attr.kind,
                        reason,
                    })
            })
            .collect()
    }
}

fn hint(hints: &mut HashMap<String, BTreeSet<AttributeKind>>, name: &str, kind: AttributeKind) {
    hints.entry(name.to_string()).or_default().insert(kind);
}

/// Collect kind hints for request attributes.
///
/// `boolean_ctx` is true where the expression's value is used as a truth value.
fn infer(expr: &Expr, boolean_ctx: bool, hints: &mut HashMap<String, BTreeSet<AttributeKind>>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Attr(attr) => {
            if attr.scope != Scope::Request {
                return;
            }
            if !attr.path.is_empty() {
                hint(hints, &attr.name, AttributeKind::Record);
            } else if boolean_ctx {
                hint(hints, &attr.name, AttributeKind::Boolean);
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                infer(arg, false, hints);
            }
        }
        Expr::Unary { op, expr } => match op {
            UnaryOp::Not => infer(expr, true, hints),
            UnaryOp::Neg => {
                if let Some(name) = expr.as_bare_request() {
                    hint(hints, name, AttributeKind::Number);
                }
                infer(expr, false, hints);
            }
        },
        Expr::Binary { op, lhs, rhs } => {
            if op.is_logical() {
                infer(lhs, true, hints);
                infer(rhs, true, hints);
                return;
            }

            if op.is_ordering() || op.is_numeric_arithmetic() {
                for side in [lhs, rhs] {
                    if let Some(name) = side.as_bare_request() {
                        hint(hints, name, AttributeKind::Number);
                    }
                }
            } else {
                // ==, != and + take their kind from a literal on the other side.
                for (side, other) in [(lhs, rhs), (rhs, lhs)] {
                    if let (Some(name), Expr::Literal(lit)) = (side.as_bare_request(), &**other) {
                        match lit {
                            Value::Number(_) => hint(hints, name, AttributeKind::Number),
                            Value::Bool(_) if *op != BinaryOp::Add => {
                                hint(hints, name, AttributeKind::Boolean)
                            }
                            _ => {}
                        }
                    }
                }
            }

            infer(lhs, false, hints);
            infer(rhs, false, hints);
        }
        Expr::In { needle, haystack } => {
            if let Some(name) = needle.as_bare_request() {
                let all_numbers = !haystack.is_empty()
                    && haystack
                        .iter()
                        .all(|h| matches!(h, Expr::Literal(Value::Number(_))));
                if all_numbers {
                    hint(hints, name, AttributeKind::Number);
                }
            }
            infer(needle, false, hints);
            for item in haystack {
                infer(item, false, hints);
            }
        }
    }
}
