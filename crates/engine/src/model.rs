//! Model text parsing.
//!
//! A model is a small INI-like document:
//!
//! - `[request_definition]`: `r = sub, obj, act` (attributes may be annotated, `age:number`)
//! - `[policy_definition]`: `p = sub, obj, act` (more policy types as `p2`, `p3`, ...)
//! - `[role_definition]`: optional, `g = _, _` or `g = _, _, _` for domain-scoped roles
//! - `[policy_effect]`: `e = some(where (p.eft == allow))`
//! - `[matchers]`: `m = r.sub == p.sub && ...`
//!
//! Lines starting with `#` are comments; a trailing `\` continues a line.

use std::collections::{BTreeMap, HashSet};

use crate::effect::Effect;
use crate::error::{EngineError, EngineResult};
use crate::expr::{self, Expr};
use crate::schema::AttributeKind;

/// One attribute of a request or policy definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Explicit kind annotation (request definition only).
    pub kind: Option<AttributeKind>,
}

/// A named, ordered attribute list (`r = sub, obj, act`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    key: String,
    fields: Vec<Field>,
}

impl Definition {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn render(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| match f.kind {
                Some(kind) => format!("{}:{}", f.name, kind.as_str()),
                None => f.name.clone(),
            })
            .collect();
        format!("{} = {}", self.key, fields.join(", "))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Section {
    Request,
    Policy,
    Role,
    Effect,
    Matchers,
}

impl Section {
    fn from_header(name: &str) -> Option<Self> {
        match name {
            "request_definition" => Some(Section::Request),
            "policy_definition" => Some(Section::Policy),
            "role_definition" => Some(Section::Role),
            "policy_effect" => Some(Section::Effect),
            "matchers" => Some(Section::Matchers),
            _ => None,
        }
    }

    fn header(&self) -> &'static str {
        match self {
            Section::Request => "request_definition",
            Section::Policy => "policy_definition",
            Section::Role => "role_definition",
            Section::Effect => "policy_effect",
            Section::Matchers => "matchers",
        }
    }
}

/// A parsed model: request shape, policy shapes, role shapes, effect and matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    request: Definition,
    policies: BTreeMap<String, Definition>,
    /// Role type (`g`, `g2`, ...) → rule arity (2, or 3 with a domain).
    roles: BTreeMap<String, usize>,
    effect: Effect,
    effect_text: String,
    matcher: Expr,
    matcher_text: String,
}

impl Model {
    /// Parse model text. Any structural problem is a `ModelParse` error.
    pub fn from_text(text: &str) -> EngineResult<Self> {
        let mut request: Option<Definition> = None;
        let mut policies = BTreeMap::new();
        let mut roles = BTreeMap::new();
        let mut effect: Option<(Effect, String)> = None;
        let mut matcher: Option<(Expr, String)> = None;

        let mut section: Option<Section> = None;
        let mut pending = String::new();

        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let trimmed = raw.trim();
            if let Some(head) = trimmed.strip_suffix('\\') {
                pending.push_str(head);
                pending.push(' ');
                continue;
            }
            let line = if pending.is_empty() {
                trimmed.to_string()
            } else {
                let joined = format!("{pending}{trimmed}");
                pending.clear();
                joined
            };
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                section = Some(Section::from_header(name).ok_or_else(|| {
                    EngineError::model_parse(format!("line {lineno}: unknown section [{name}]"))
                })?);
                continue;
            }

            let Some(current) = section else {
                return Err(EngineError::model_parse(format!(
                    "line {lineno}: definition outside of any section"
                )));
            };
            let Some((key, value)) = line.split_once('=') else {
                return Err(EngineError::model_parse(format!(
                    "line {lineno}: expected 'key = value'"
                )));
            };
            let key = key.trim();
            let value = value.trim();

            match current {
                Section::Request => {
                    expect_key(key, "r", current, lineno)?;
                    if request.is_some() {
                        return Err(duplicate(key, lineno));
                    }
                    request = Some(parse_definition(key, value, true, lineno)?);
                }
                Section::Policy => {
                    expect_numbered_key(key, 'p', current, lineno)?;
                    let def = parse_definition(key, value, false, lineno)?;
                    if policies.insert(key.to_string(), def).is_some() {
                        return Err(duplicate(key, lineno));
                    }
                }
                Section::Role => {
                    expect_numbered_key(key, 'g', current, lineno)?;
                    let arity = parse_role_arity(value, lineno)?;
                    if roles.insert(key.to_string(), arity).is_some() {
                        return Err(duplicate(key, lineno));
                    }
                }
                Section::Effect => {
                    expect_key(key, "e", current, lineno)?;
                    if effect.is_some() {
                        return Err(duplicate(key, lineno));
                    }
                    effect = Some((Effect::parse(value)?, value.to_string()));
                }
                Section::Matchers => {
                    expect_key(key, "m", current, lineno)?;
                    if matcher.is_some() {
                        return Err(duplicate(key, lineno));
                    }
                    let parsed = expr::parse(value).map_err(|e| match e {
                        EngineError::ModelParse(msg) => {
                            EngineError::model_parse(format!("line {lineno}: matcher: {msg}"))
                        }
                        other => other,
                    })?;
                    matcher = Some((parsed, value.to_string()));
                }
            }
        }

        if !pending.is_empty() {
            return Err(EngineError::model_parse(
                "model ends with a line continuation",
            ));
        }

        let request = request.ok_or_else(|| missing(Section::Request))?;
        if !policies.contains_key("p") {
            return Err(missing(Section::Policy));
        }
        let (effect, effect_text) = effect.ok_or_else(|| missing(Section::Effect))?;
        let (matcher, matcher_text) = matcher.ok_or_else(|| missing(Section::Matchers))?;

        Ok(Self {
            request,
            policies,
            roles,
            effect,
            effect_text,
            matcher,
            matcher_text,
        })
    }

    pub fn request(&self) -> &Definition {
        &self.request
    }

    /// The primary policy definition (`p`), the one the matcher reads.
    pub fn policy(&self) -> &Definition {
        // Presence of "p" is checked in `from_text`.
        &self.policies["p"]
    }

    pub fn policy_definition(&self, ptype: &str) -> Option<&Definition> {
        self.policies.get(ptype)
    }

    pub fn role_types(&self) -> impl Iterator<Item = (&str, usize)> {
        self.roles.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn role_arity(&self, gtype: &str) -> Option<usize> {
        self.roles.get(gtype).copied()
    }

    /// Arity of rules of type `ptype` (policy or role), if the model defines it.
    pub fn rule_arity(&self, ptype: &str) -> Option<usize> {
        self.policies
            .get(ptype)
            .map(Definition::arity)
            .or_else(|| self.role_arity(ptype))
    }

    pub fn is_role_type(&self, ptype: &str) -> bool {
        self.roles.contains_key(ptype)
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn matcher(&self) -> &Expr {
        &self.matcher
    }

    pub fn matcher_text(&self) -> &str {
        &self.matcher_text
    }

    /// Canonical text form of the model.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("[request_definition]\n");
        out.push_str(&self.request.render());
        out.push_str("\n\n[policy_definition]\n");
        for def in self.policies.values() {
            out.push_str(&def.render());
            out.push('\n');
        }
        if !self.roles.is_empty() {
            out.push_str("\n[role_definition]\n");
            for (key, arity) in &self.roles {
                out.push_str(&format!("{key} = {}\n", vec!["_"; *arity].join(", ")));
            }
        }
        out.push_str("\n[policy_effect]\n");
        out.push_str(&format!("e = {}\n", self.effect_text));
        out.push_str("\n[matchers]\n");
        out.push_str(&format!("m = {}\n", self.matcher_text));
        out
    }
}

impl core::str::FromStr for Model {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

fn expect_key(key: &str, want: &str, section: Section, lineno: usize) -> EngineResult<()> {
    if key == want {
        Ok(())
    } else {
        Err(EngineError::model_parse(format!(
            "line {lineno}: [{}] only supports '{want}', found '{key}'",
            section.header()
        )))
    }
}

fn expect_numbered_key(key: &str, prefix: char, section: Section, lineno: usize) -> EngineResult<()> {
    let valid = key
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(EngineError::model_parse(format!(
            "line {lineno}: invalid key '{key}' in [{}]",
            section.header()
        )))
    }
}

fn duplicate(key: &str, lineno: usize) -> EngineError {
    EngineError::model_parse(format!("line {lineno}: '{key}' is defined twice"))
}

fn missing(section: Section) -> EngineError {
    EngineError::model_parse(format!("missing [{}] section", section.header()))
}

fn parse_definition(key: &str, value: &str, annotated: bool, lineno: usize) -> EngineResult<Definition> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();

    for raw in value.split(',') {
        let raw = raw.trim();
        let (name, kind) = match raw.split_once(':') {
            Some((name, kind)) if annotated => {
                let kind = kind.trim().parse::<AttributeKind>().map_err(|e| {
                    EngineError::model_parse(format!("line {lineno}: {e}"))
                })?;
                (name.trim(), Some(kind))
            }
            Some(_) => {
                return Err(EngineError::model_parse(format!(
                    "line {lineno}: type annotations are only allowed in the request definition"
                )));
            }
            None => (raw, None),
        };

        let valid_name = !name.is_empty()
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid_name {
            return Err(EngineError::model_parse(format!(
                "line {lineno}: invalid attribute name '{name}' in '{key}'"
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(EngineError::model_parse(format!(
                "line {lineno}: attribute '{name}' appears twice in '{key}'"
            )));
        }
        fields.push(Field {
            name: name.to_string(),
            kind,
        });
    }

    Ok(Definition {
        key: key.to_string(),
        fields,
    })
}

fn parse_role_arity(value: &str, lineno: usize) -> EngineResult<usize> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.iter().any(|p| *p != "_") || !(2..=3).contains(&parts.len()) {
        return Err(EngineError::model_parse(format!(
            "line {lineno}: role definitions must be '_, _' or '_, _, _'"
        )));
    }
    Ok(parts.len())
}
