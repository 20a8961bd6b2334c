//! Matcher evaluation.
//!
//! The matcher AST is compiled once per enforcer into [`CompiledMatcher`]:
//! attribute names become positional indexes, function names become resolved
//! built-ins or role lookups. Evaluation then only reads call-scoped request
//! values and one policy rule at a time.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::expr::{AttrRef, BinaryOp, Expr, Scope, UnaryOp};
use crate::functions::{Builtin, RegexCache, key_match, key_match2_regex};
use crate::model::Model;
use crate::roles::RoleGraph;
use crate::value::Value;

#[derive(Debug, Clone)]
enum Node {
    Lit(Value),
    Req { index: usize, name: String, path: Vec<String> },
    Pol { index: usize },
    Role { gtype: String, args: Vec<Node> },
    Func { func: Builtin, args: Vec<Node> },
    Not(Box<Node>),
    Neg(Box<Node>),
    Bin { op: BinaryOp, lhs: Box<Node>, rhs: Box<Node> },
    In { needle: Box<Node>, haystack: Vec<Node> },
}

/// A matcher bound to one model.
#[derive(Debug)]
pub struct CompiledMatcher {
    root: Node,
    regexes: RegexCache,
}

/// Everything one evaluation may read.
struct Bindings<'a> {
    request: &'a [Value],
    policy: &'a [String],
    roles: &'a HashMap<String, RoleGraph>,
}

impl CompiledMatcher {
    /// Resolve every reference in the model's matcher.
    ///
    /// Unknown attributes, unknown functions and arity mistakes are
    /// `InvalidModel` errors.
    pub fn compile(model: &Model) -> EngineResult<Self> {
        let root = compile_expr(model, model.matcher())?;
        Ok(Self {
            root,
            regexes: RegexCache::new(),
        })
    }

    /// Evaluate against one request and one policy rule.
    pub fn eval(
        &self,
        request: &[Value],
        policy: &[String],
        roles: &HashMap<String, RoleGraph>,
    ) -> EngineResult<bool> {
        let scope = Bindings {
            request,
            policy,
            roles,
        };
        match self.eval_node(&self.root, &scope)? {
            Value::Bool(b) => Ok(b),
            other => Err(EngineError::evaluation(format!(
                "matcher produced a {} instead of a boolean",
                other.type_name()
            ))),
        }
    }

    fn eval_node(&self, node: &Node, scope: &Bindings<'_>) -> EngineResult<Value> {
        match node {
            Node::Lit(v) => Ok(v.clone()),
            Node::Req { index, name, path } => {
                let mut current = scope.request.get(*index).ok_or_else(|| {
                    EngineError::evaluation(format!("request has no value for r.{name}"))
                })?;
                for field in path {
                    current = match current {
                        Value::Record(_) => current.field(field).ok_or_else(|| {
                            EngineError::evaluation(format!("r.{name} has no field '{field}'"))
                        })?,
                        other => {
                            return Err(EngineError::evaluation(format!(
                                "cannot read field '{field}' of a {} (r.{name})",
                                other.type_name()
                            )));
                        }
                    };
                }
                Ok(current.clone())
            }
            Node::Pol { index } => Ok(Value::Text(
                scope.policy.get(*index).cloned().unwrap_or_default(),
            )),
            Node::Role { gtype, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval_node(a, scope).and_then(|v| as_text(&v)))
                    .collect::<EngineResult<Vec<String>>>()?;
                let domain = args.get(2).map(String::as_str);
                let linked = match scope.roles.get(gtype) {
                    Some(graph) => graph.has_link(&args[0], &args[1], domain),
                    None => args[0] == args[1],
                };
                Ok(Value::Bool(linked))
            }
            Node::Func { func, args } => {
                let key = as_text(&self.eval_node(&args[0], scope)?)?;
                let pattern = as_text(&self.eval_node(&args[1], scope)?)?;
                let matched = match func {
                    Builtin::KeyMatch => key_match(&key, &pattern),
                    Builtin::KeyMatch2 => self.regex_match(&key_match2_regex(&pattern), &key)?,
                    Builtin::RegexMatch => self.regex_match(&pattern, &key)?,
                };
                Ok(Value::Bool(matched))
            }
            Node::Not(inner) => {
                let v = self.eval_node(inner, scope)?;
                Ok(Value::Bool(!expect_bool(&v, "!")?))
            }
            Node::Neg(inner) => {
                let v = self.eval_node(inner, scope)?;
                let n = as_number(&v)
                    .ok_or_else(|| EngineError::evaluation(format!("cannot negate a {}", v.type_name())))?;
                Ok(Value::Number(-n))
            }
            Node::Bin { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval_node(lhs, scope)?;
                    if !expect_bool(&l, "&&")? {
                        return Ok(Value::Bool(false));
                    }
                    let r = self.eval_node(rhs, scope)?;
                    Ok(Value::Bool(expect_bool(&r, "&&")?))
                }
                BinaryOp::Or => {
                    let l = self.eval_node(lhs, scope)?;
                    if expect_bool(&l, "||")? {
                        return Ok(Value::Bool(true));
                    }
                    let r = self.eval_node(rhs, scope)?;
                    Ok(Value::Bool(expect_bool(&r, "||")?))
                }
                _ => {
                    let l = self.eval_node(lhs, scope)?;
                    let r = self.eval_node(rhs, scope)?;
                    binary(*op, &l, &r)
                }
            },
            Node::In { needle, haystack } => {
                let needle = self.eval_node(needle, scope)?;
                for item in haystack {
                    if loose_eq(&needle, &self.eval_node(item, scope)?)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
        }
    }

    fn regex_match(&self, pattern: &str, value: &str) -> EngineResult<bool> {
        self.regexes
            .is_match(pattern, value)
            .map_err(|e| EngineError::evaluation(format!("invalid pattern '{pattern}': {e}")))
    }
}

fn compile_expr(model: &Model, expr: &Expr) -> EngineResult<Node> {
    Ok(match expr {
        Expr::Literal(v) => Node::Lit(v.clone()),
        Expr::Attr(attr) => compile_attr(model, attr)?,
        Expr::Call { name, args } => {
            let compiled = args
                .iter()
                .map(|a| compile_expr(model, a))
                .collect::<EngineResult<Vec<_>>>()?;
            if let Some(arity) = model.role_arity(name) {
                if compiled.len() != arity {
                    return Err(EngineError::invalid_model(format!(
                        "{name}() takes {arity} arguments, matcher passes {}",
                        compiled.len()
                    )));
                }
                Node::Role {
                    gtype: name.clone(),
                    args: compiled,
                }
            } else if let Some(func) = Builtin::lookup(name) {
                if compiled.len() != func.arity() {
                    return Err(EngineError::invalid_model(format!(
                        "{name}() takes {} arguments, matcher passes {}",
                        func.arity(),
                        compiled.len()
                    )));
                }
                Node::Func {
                    func,
                    args: compiled,
                }
            } else {
                return Err(EngineError::invalid_model(format!(
                    "matcher calls unknown function '{name}'"
                )));
            }
        }
        Expr::Unary { op, expr } => {
            let inner = Box::new(compile_expr(model, expr)?);
            match op {
                UnaryOp::Not => Node::Not(inner),
                UnaryOp::Neg => Node::Neg(inner),
            }
        }
        Expr::Binary { op, lhs, rhs } => Node::Bin {
            op: *op,
            lhs: Box::new(compile_expr(model, lhs)?),
            rhs: Box::new(compile_expr(model, rhs)?),
        },
        Expr::In { needle, haystack } => Node::In {
            needle: Box::new(compile_expr(model, needle)?),
            haystack: haystack
                .iter()
                .map(|h| compile_expr(model, h))
                .collect::<EngineResult<Vec<_>>>()?,
        },
    })
}

fn compile_attr(model: &Model, attr: &AttrRef) -> EngineResult<Node> {
    match attr.scope {
        Scope::Request => {
            let index = model.request().index_of(&attr.name).ok_or_else(|| {
                EngineError::invalid_model(format!(
                    "matcher references {attr}, which the request definition does not declare"
                ))
            })?;
            Ok(Node::Req {
                index,
                name: attr.name.clone(),
                path: attr.path.clone(),
            })
        }
        Scope::Policy => {
            let index = model.policy().index_of(&attr.name).ok_or_else(|| {
                EngineError::invalid_model(format!(
                    "matcher references {attr}, which the policy definition does not declare"
                ))
            })?;
            Ok(Node::Pol { index })
        }
    }
}

fn expect_bool(v: &Value, op: &str) -> EngineResult<bool> {
    v.as_bool().ok_or_else(|| {
        EngineError::evaluation(format!("operand of '{op}' is a {}, not a boolean", v.type_name()))
    })
}

fn as_text(v: &Value) -> EngineResult<String> {
    match v {
        Value::Record(_) => Err(EngineError::evaluation(
            "an attribute record cannot be used as text",
        )),
        other => Ok(other.to_string()),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => Some(*n),
        Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Equality across kinds: policy values are text, so numbers and booleans
/// compare against their parsed text form. Unparseable text is simply unequal.
fn loose_eq(l: &Value, r: &Value) -> EngineResult<bool> {
    Ok(match (l, r) {
        (Value::Record(_), _) | (_, Value::Record(_)) => {
            return Err(EngineError::evaluation(
                "attribute records cannot be compared; compare one of their fields",
            ));
        }
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(n), Value::Text(s)) | (Value::Text(s), Value::Number(n)) => {
            s.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
        }
        (Value::Bool(b), Value::Text(s)) | (Value::Text(s), Value::Bool(b)) => {
            parse_bool(s) == Some(*b)
        }
        (Value::Number(_), Value::Bool(_)) | (Value::Bool(_), Value::Number(_)) => false,
    })
}

fn ordering(op: BinaryOp, l: &Value, r: &Value) -> EngineResult<bool> {
    let ord = match (l, r) {
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        _ => {
            let (a, b) = match (as_number(l), as_number(r)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EngineError::evaluation(format!(
                        "cannot order '{l}' ({}) against '{r}' ({})",
                        l.type_name(),
                        r.type_name()
                    )));
                }
            };
            a.partial_cmp(&b).ok_or_else(|| {
                EngineError::evaluation(format!("cannot order {a} against {b}"))
            })?
        }
    };
    Ok(match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        _ => ord.is_ge(),
    })
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> EngineResult<Value> {
    if op == BinaryOp::Add {
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => return Ok(Value::Number(a + b)),
            (Value::Text(_), Value::Record(_)) | (Value::Record(_), _) => {}
            (Value::Text(_), _) | (_, Value::Text(_)) => {
                return Ok(Value::Text(format!("{}{}", as_text(l)?, as_text(r)?)));
            }
            _ => {}
        }
    }

    let (a, b) = match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EngineError::evaluation(format!(
                "arithmetic on a {} and a {}",
                l.type_name(),
                r.type_name()
            )));
        }
    };
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(EngineError::evaluation("division by zero"));
        }
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(Value::Number(n))
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> EngineResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(l, r)?)),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(l, r)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Ok(Value::Bool(ordering(op, l, r)?))
        }
        BinaryOp::And | BinaryOp::Or => Err(EngineError::evaluation(
            "logical operators are evaluated with short-circuiting",
        )),
        _ => arithmetic(op, l, r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(request: &str, policy: &str, roles: &str, matcher: &str) -> Model {
        let text = format!(
            "[request_definition]\nr = {request}\n\n[policy_definition]\np = {policy}\n\n\
             {roles}\n[policy_effect]\ne = some(where (p.eft == allow))\n\n[matchers]\nm = {matcher}\n"
        );
        Model::from_text(&text).unwrap()
    }

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn texts(parts: &[&str]) -> Vec<Value> {
        parts.iter().map(|s| Value::text(*s)).collect()
    }

    #[test]
    fn acl_matcher_compares_request_with_policy() {
        let m = model(
            "sub, obj, act",
            "sub, obj, act",
            "",
            "r.sub == p.sub && r.obj == p.obj && r.act == p.act",
        );
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let policy = strings(&["alice", "data1", "read"]);
        let roles = HashMap::new();
        assert!(matcher.eval(&texts(&["alice", "data1", "read"]), &policy, &roles).unwrap());
        assert!(!matcher.eval(&texts(&["alice", "data1", "write"]), &policy, &roles).unwrap());
    }

    #[test]
    fn numbers_compare_against_policy_text() {
        let m = model("sub, age", "sub, min", "", "r.sub == p.sub && r.age >= p.min");
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let roles = HashMap::new();
        let request = vec![Value::text("alice"), Value::Number(30.0)];

        assert!(matcher.eval(&request, &strings(&["alice", "18"]), &roles).unwrap());
        assert!(!matcher.eval(&request, &strings(&["alice", "40"]), &roles).unwrap());
        assert!(matches!(
            matcher.eval(&request, &strings(&["alice", "adult"]), &roles),
            Err(EngineError::Evaluation(_))
        ));
    }

    #[test]
    fn record_fields_are_reachable() {
        let m = model("sub, obj", "sub, obj, act", "", "r.sub.Age > 18 && r.obj.Owner == r.sub.Name");
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let sub = Value::from_json(serde_json::json!({ "Name": "alice", "Age": 30 })).unwrap();
        let obj = Value::from_json(serde_json::json!({ "Owner": "alice" })).unwrap();
        let roles = HashMap::new();
        assert!(matcher.eval(&[sub.clone(), obj], &strings(&["", "", ""]), &roles).unwrap());

        let other = Value::from_json(serde_json::json!({ "Owner": "bob" })).unwrap();
        assert!(!matcher.eval(&[sub, other], &strings(&["", "", ""]), &roles).unwrap());
    }

    #[test]
    fn role_calls_follow_the_graph() {
        let m = model(
            "sub, obj, act",
            "sub, obj, act",
            "[role_definition]\ng = _, _\n",
            "g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act",
        );
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let mut roles = HashMap::new();
        roles.insert(
            "g".to_string(),
            RoleGraph::from_rules(&[strings(&["alice", "admin"])]),
        );
        let policy = strings(&["admin", "data", "write"]);
        assert!(matcher.eval(&texts(&["alice", "data", "write"]), &policy, &roles).unwrap());
        assert!(!matcher.eval(&texts(&["bob", "data", "write"]), &policy, &roles).unwrap());
    }

    #[test]
    fn builtins_and_in_lists() {
        let m = model(
            "sub, path, act",
            "sub, path, act",
            "",
            "r.sub in ('alice', 'bob') && keyMatch2(r.path, p.path) && regexMatch(r.act, p.act)",
        );
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let policy = strings(&["*", "/users/:id", "^(GET|PUT)$"]);
        let roles = HashMap::new();
        assert!(matcher.eval(&texts(&["bob", "/users/7", "PUT"]), &policy, &roles).unwrap());
        assert!(!matcher.eval(&texts(&["carol", "/users/7", "PUT"]), &policy, &roles).unwrap());
        assert!(!matcher.eval(&texts(&["bob", "/users/7", "DELETE"]), &policy, &roles).unwrap());
    }

    #[test]
    fn compile_rejects_unknown_references() {
        let unknown_attr = model("sub", "sub", "", "r.name == p.sub");
        assert!(matches!(
            CompiledMatcher::compile(&unknown_attr),
            Err(EngineError::InvalidModel(_))
        ));

        let unknown_fn = model("sub", "sub", "", "globMatch(r.sub, p.sub)");
        assert!(matches!(
            CompiledMatcher::compile(&unknown_fn),
            Err(EngineError::InvalidModel(_))
        ));

        let bad_role_arity = model("sub", "sub", "[role_definition]\ng = _, _\n", "g(r.sub, p.sub, 'd1')");
        assert!(matches!(
            CompiledMatcher::compile(&bad_role_arity),
            Err(EngineError::InvalidModel(_))
        ));
    }

    #[test]
    fn non_boolean_results_and_division_by_zero_fail() {
        let m = model("n", "sub", "", "r.n / 0 > 1");
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let roles = HashMap::new();
        assert!(matches!(
            matcher.eval(&[Value::Number(4.0)], &strings(&["x"]), &roles),
            Err(EngineError::Evaluation(_))
        ));

        let m = model("n", "sub", "", "r.n + 1");
        let matcher = CompiledMatcher::compile(&m).unwrap();
        assert!(matches!(
            matcher.eval(&[Value::Number(4.0)], &strings(&["x"]), &roles),
            Err(EngineError::Evaluation(_))
        ));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // The right-hand side would fail on a text request value.
        let m = model("flag, n", "sub", "", "r.flag || r.n.Missing == 1");
        let matcher = CompiledMatcher::compile(&m).unwrap();
        let roles = HashMap::new();
        let request = vec![Value::Bool(true), Value::text("x")];
        assert!(matcher.eval(&request, &strings(&["x"]), &roles).unwrap());
    }
}
