//! Policy rules and the in-memory rule set an enforcer evaluates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::model::Model;

/// One stored rule: its type (`p`, `p2`, `g`, ...) and its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyRule {
    pub fn new<S: Into<String>>(ptype: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            ptype: ptype.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Render as a policy-file line: `p, alice, data1, read`.
    pub fn to_csv_line(&self) -> String {
        let mut out = self.ptype.clone();
        for value in &self.values {
            out.push_str(", ");
            out.push_str(&quote_field(value));
        }
        out
    }

    /// Parse one policy-file record. Blank lines and `#` comments yield `None`.
    pub fn from_csv_line(line: &str) -> Option<Result<Self, AdapterError>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        Some(split_fields(trimmed).and_then(|mut fields| {
            let ptype = fields.remove(0);
            if ptype.is_empty() {
                return Err(AdapterError::Format(format!("rule without a type: '{trimmed}'")));
            }
            Ok(Self {
                ptype,
                values: fields,
            })
        }))
    }
}

/// Split policy-file text into records with their 1-based starting line.
///
/// A record ends at a line break outside double quotes, so a quoted value
/// may span several lines. Quotes inside `#` comments are not interpreted.
pub fn csv_records(text: &str) -> Vec<(usize, &str)> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut start_line = 1;
    let mut line = 1;
    let mut in_quotes = false;
    let mut blank = true;
    let mut comment = false;

    for (idx, c) in text.char_indices() {
        if c == '\n' {
            line += 1;
            if !in_quotes {
                records.push((start_line, &text[start..idx]));
                start = idx + 1;
                start_line = line;
                blank = true;
                comment = false;
            }
        } else if c == '#' && blank {
            blank = false;
            comment = true;
        } else if c == '"' && !comment {
            blank = false;
            in_quotes = !in_quotes;
        } else if !c.is_whitespace() {
            blank = false;
        }
    }
    if start < text.len() {
        records.push((start_line, &text[start..]));
    }
    records
}

fn quote_field(value: &str) -> String {
    let needs_quotes = value.contains([',', '"', '\n', '\r'])
        || value.trim() != value;
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split a comma-separated line; double quotes protect commas, `""` escapes a quote.
fn split_fields(line: &str) -> Result<Vec<String>, AdapterError> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
            chars.next();
        }

        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => {
                        return Err(AdapterError::Format(format!(
                            "unterminated quote in '{line}'"
                        )));
                    }
                }
            }
            while chars.peek().is_some_and(|c| *c != ',') {
                if chars.next().is_some_and(|c| !c.is_whitespace()) {
                    return Err(AdapterError::Format(format!(
                        "unexpected text after quoted value in '{line}'"
                    )));
                }
            }
        } else {
            while let Some(c) = chars.peek().copied() {
                if c == ',' {
                    break;
                }
                field.push(c);
                chars.next();
            }
            field = field.trim_end().to_string();
        }
        fields.push(field);

        if chars.next().is_none() {
            return Ok(fields);
        }
    }
}

/// Rules grouped by type, insertion order preserved within each type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    rules: BTreeMap<String, Vec<Vec<String>>>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from stored rules, keeping only rules the model can use.
    ///
    /// Trailing empty values (padding written by column-based stores) are
    /// dropped and short rules are padded back to the definition's arity.
    /// Unknown types, over-long rules and duplicates are skipped with a warning.
    pub fn from_rules(model: &Model, rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let mut set = Self::new();
        for rule in rules {
            let Some(arity) = model.rule_arity(&rule.ptype) else {
                tracing::warn!(ptype = %rule.ptype, "skipping rule of a type the model does not define");
                continue;
            };

            let mut values = rule.values;
            while values.last().is_some_and(|v| v.is_empty()) {
                values.pop();
            }
            if values.is_empty() || values.len() > arity {
                tracing::warn!(
                    ptype = %rule.ptype,
                    found = values.len(),
                    expected = arity,
                    "skipping rule with wrong number of values"
                );
                continue;
            }
            values.resize(arity, String::new());

            if !set.add(&rule.ptype, values) {
                tracing::debug!(ptype = %rule.ptype, "skipping duplicate rule");
            }
        }
        set
    }

    pub fn rules(&self, ptype: &str) -> &[Vec<String>] {
        self.rules.get(ptype).map(Vec::as_slice).unwrap_or_default()
    }

    /// Append a rule. Returns false if an identical rule already exists.
    pub fn add(&mut self, ptype: &str, values: Vec<String>) -> bool {
        let bucket = self.rules.entry(ptype.to_string()).or_default();
        if bucket.contains(&values) {
            return false;
        }
        bucket.push(values);
        true
    }

    /// Remove a rule. Returns false if it was not present.
    pub fn remove(&mut self, ptype: &str, values: &[String]) -> bool {
        let Some(bucket) = self.rules.get_mut(ptype) else {
            return false;
        };
        match bucket.iter().position(|r| r.as_slice() == values) {
            Some(idx) => {
                bucket.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into storable rules: policy types first, then role types.
    pub fn to_rules(&self) -> Vec<PolicyRule> {
        let (policies, roles): (Vec<_>, Vec<_>) =
            self.rules.iter().partition(|(ptype, _)| ptype.starts_with('p'));
        policies
            .into_iter()
            .chain(roles)
            .flat_map(|(ptype, bucket)| {
                bucket.iter().map(move |values| PolicyRule {
                    ptype: ptype.clone(),
                    values: values.clone(),
                })
            })
            .collect()
    }
}
