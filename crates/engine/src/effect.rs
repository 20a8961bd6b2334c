//! Policy effect: how matched rules combine into a decision.

use crate::error::{EngineError, EngineResult};

/// Supported `[policy_effect]` expressions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Effect {
    /// `some(where (p.eft == allow))`
    AllowOverride,
    /// `!some(where (p.eft == deny))`
    DenyOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`
    AllowAndDeny,
    /// `priority(p.eft) || deny`: the first matching rule decides.
    Priority,
}

/// Effect of a single matched rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuleEffect {
    Allow,
    Deny,
    /// Any `eft` value other than allow/deny; never decides on its own.
    Indeterminate,
}

impl RuleEffect {
    pub fn from_eft(eft: Option<&str>) -> Self {
        match eft {
            None | Some("allow") => RuleEffect::Allow,
            Some("deny") => RuleEffect::Deny,
            Some(_) => RuleEffect::Indeterminate,
        }
    }
}

/// Outcome of feeding one matched rule to an effect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Decision reached; remaining rules need not be evaluated.
    Final(bool),
    Continue,
}

impl Effect {
    pub fn parse(src: &str) -> EngineResult<Self> {
        let compact: String = src.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "some(where(p.eft==allow))" => Ok(Effect::AllowOverride),
            "!some(where(p.eft==deny))" => Ok(Effect::DenyOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Ok(Effect::AllowAndDeny),
            "priority(p.eft)||deny" => Ok(Effect::Priority),
            _ => Err(EngineError::model_parse(format!(
                "unsupported policy effect '{}'",
                src.trim()
            ))),
        }
    }

    /// Feed one matched rule.
    pub fn observe(&self, effect: RuleEffect, allowed_so_far: &mut bool) -> Verdict {
        match (self, effect) {
            (Effect::AllowOverride, RuleEffect::Allow) => Verdict::Final(true),
            (Effect::DenyOverride, RuleEffect::Deny) => Verdict::Final(false),
            (Effect::AllowAndDeny, RuleEffect::Deny) => Verdict::Final(false),
            (Effect::AllowAndDeny, RuleEffect::Allow) => {
                *allowed_so_far = true;
                Verdict::Continue
            }
            (Effect::Priority, RuleEffect::Allow) => Verdict::Final(true),
            (Effect::Priority, RuleEffect::Deny) => Verdict::Final(false),
            _ => Verdict::Continue,
        }
    }

    /// Decision when every rule has been observed without a final verdict.
    pub fn conclude(&self, allowed_so_far: bool) -> bool {
        match self {
            Effect::AllowOverride => false,
            Effect::DenyOverride => true,
            Effect::AllowAndDeny => allowed_so_far,
            Effect::Priority => false,
        }
    }
}
