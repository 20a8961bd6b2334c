//! Enforcers: a model, a compiled matcher, a policy set and an adapter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::adapter::Adapter;
use crate::effect::{RuleEffect, Verdict};
use crate::error::{EngineError, EngineResult};
use crate::eval::CompiledMatcher;
use crate::model::Model;
use crate::policy::PolicySet;
use crate::roles::RoleGraph;
use crate::value::Value;

/// A policy decision point.
///
/// Decisions take call-scoped, already typed request values; nothing an
/// enforcer owns is modified by `enforce`.
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Decide one request. `request` must match the request definition's arity.
    fn enforce(&self, request: &[Value]) -> EngineResult<bool>;

    /// Replace in-memory policy with the adapter's contents.
    async fn load_policy(&self) -> EngineResult<()>;

    /// Write in-memory policy through the adapter.
    async fn save_policy(&self) -> EngineResult<()>;

    /// Add a rule of type `ptype` (policy or role). Returns false if it was already present.
    fn add_policy(&self, ptype: &str, values: Vec<String>) -> EngineResult<bool>;

    /// Remove a rule of type `ptype`. Returns false if it was not present.
    fn remove_policy(&self, ptype: &str, values: &[String]) -> EngineResult<bool>;

    /// Current rules of type `ptype`.
    fn policy(&self, ptype: &str) -> EngineResult<Vec<Vec<String>>>;
}

#[derive(Debug, Default)]
struct PolicyState {
    policies: PolicySet,
    roles: HashMap<String, RoleGraph>,
}

impl PolicyState {
    fn new(model: &Model, policies: PolicySet) -> Self {
        let mut state = Self {
            policies,
            roles: HashMap::new(),
        };
        state.rebuild_roles(model);
        state
    }

    fn rebuild_roles(&mut self, model: &Model) {
        self.roles = model
            .role_types()
            .map(|(gtype, _)| {
                (
                    gtype.to_string(),
                    RoleGraph::from_rules(self.policies.rules(gtype)),
                )
            })
            .collect();
    }
}

/// The standard enforcer.
pub struct DefaultEnforcer {
    model: Model,
    matcher: CompiledMatcher,
    eft_index: Option<usize>,
    adapter: Arc<dyn Adapter>,
    state: RwLock<PolicyState>,
}

impl core::fmt::Debug for DefaultEnforcer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DefaultEnforcer")
            .field("model", &self.model)
            .field("driver", &self.adapter.driver())
            .finish_non_exhaustive()
    }
}

impl DefaultEnforcer {
    /// Build an enforcer with an empty policy set; call `load_policy` to fill it.
    pub fn new(model: Model, adapter: Arc<dyn Adapter>) -> EngineResult<Self> {
        let matcher = CompiledMatcher::compile(&model)?;
        let eft_index = model.policy().index_of("eft");
        Ok(Self {
            model,
            matcher,
            eft_index,
            adapter,
            state: RwLock::new(PolicyState::default()),
        })
    }

    fn read_state(&self) -> EngineResult<RwLockReadGuard<'_, PolicyState>> {
        self.state
            .read()
            .map_err(|_| EngineError::evaluation("policy state lock poisoned"))
    }

    fn write_state(&self) -> EngineResult<RwLockWriteGuard<'_, PolicyState>> {
        self.state
            .write()
            .map_err(|_| EngineError::policy("policy state lock poisoned"))
    }

    fn check_rule(&self, ptype: &str, values: &[String]) -> EngineResult<()> {
        let arity = self.model.rule_arity(ptype).ok_or_else(|| {
            EngineError::policy(format!("the model defines no policy or role type '{ptype}'"))
        })?;
        if values.len() != arity {
            return Err(EngineError::policy(format!(
                "'{ptype}' rules have {arity} values, got {}",
                values.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Enforcer for DefaultEnforcer {
    fn enforce(&self, request: &[Value]) -> EngineResult<bool> {
        let expected = self.model.request().arity();
        if request.len() != expected {
            return Err(EngineError::evaluation(format!(
                "request has {} values, the model expects {expected}",
                request.len()
            )));
        }

        let state = self.read_state()?;
        let rules = state.policies.rules("p");
        let effect = self.model.effect();

        if rules.is_empty() {
            // The matcher may not read policy values at all (e.g. pure ABAC);
            // evaluate it once against an all-empty rule.
            let blank = vec![String::new(); self.model.policy().arity()];
            let matched = self.matcher.eval(request, &blank, &state.roles)?;
            let mut allowed = false;
            if matched {
                if let Verdict::Final(decision) = effect.observe(RuleEffect::Allow, &mut allowed) {
                    return Ok(decision);
                }
            }
            return Ok(effect.conclude(allowed));
        }

        let mut allowed = false;
        for rule in rules {
            if !self.matcher.eval(request, rule, &state.roles)? {
                continue;
            }
            let eft = self.eft_index.and_then(|i| rule.get(i)).map(String::as_str);
            if let Verdict::Final(decision) = effect.observe(RuleEffect::from_eft(eft), &mut allowed) {
                return Ok(decision);
            }
        }
        Ok(effect.conclude(allowed))
    }

    async fn load_policy(&self) -> EngineResult<()> {
        let rules = self.adapter.load_policy().await?;
        let fresh = PolicyState::new(&self.model, PolicySet::from_rules(&self.model, rules));
        let count = fresh.policies.len();
        *self.write_state()? = fresh;
        tracing::debug!(rules = count, driver = self.adapter.driver(), "policy loaded");
        Ok(())
    }

    async fn save_policy(&self) -> EngineResult<()> {
        let snapshot = self.read_state()?.policies.to_rules();
        self.adapter.save_policy(&snapshot).await?;
        tracing::debug!(rules = snapshot.len(), driver = self.adapter.driver(), "policy saved");
        Ok(())
    }

    fn add_policy(&self, ptype: &str, values: Vec<String>) -> EngineResult<bool> {
        self.check_rule(ptype, &values)?;
        let mut state = self.write_state()?;
        let added = state.policies.add(ptype, values);
        if added && self.model.is_role_type(ptype) {
            state.rebuild_roles(&self.model);
        }
        Ok(added)
    }

    fn remove_policy(&self, ptype: &str, values: &[String]) -> EngineResult<bool> {
        self.check_rule(ptype, values)?;
        let mut state = self.write_state()?;
        let removed = state.policies.remove(ptype, values);
        if removed && self.model.is_role_type(ptype) {
            state.rebuild_roles(&self.model);
        }
        Ok(removed)
    }

    fn policy(&self, ptype: &str) -> EngineResult<Vec<Vec<String>>> {
        if self.model.rule_arity(ptype).is_none() {
            return Err(EngineError::policy(format!(
                "the model defines no policy or role type '{ptype}'"
            )));
        }
        Ok(self.read_state()?.policies.rules(ptype).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::policy::PolicyRule;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecAdapter {
        rules: Mutex<Vec<PolicyRule>>,
        fail: bool,
    }

    impl VecAdapter {
        fn with(rules: Vec<PolicyRule>) -> Arc<Self> {
            Arc::new(Self {
                rules: Mutex::new(rules),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl Adapter for VecAdapter {
        fn driver(&self) -> &str {
            "test"
        }

        async fn load_policy(&self) -> Result<Vec<PolicyRule>, AdapterError> {
            if self.fail {
                return Err(AdapterError::Io("unreachable".into()));
            }
            Ok(self.rules.lock().unwrap().clone())
        }

        async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), AdapterError> {
            if self.fail {
                return Err(AdapterError::Io("unreachable".into()));
            }
            *self.rules.lock().unwrap() = rules.to_vec();
            Ok(())
        }
    }

    fn rule(ptype: &str, values: &[&str]) -> PolicyRule {
        PolicyRule::new(ptype, values.iter().copied())
    }

    fn texts(parts: &[&str]) -> Vec<Value> {
        parts.iter().map(|s| Value::text(*s)).collect()
    }

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn enforcer(model: &str, rules: Vec<PolicyRule>) -> DefaultEnforcer {
        let model = Model::from_text(model).unwrap();
        let e = DefaultEnforcer::new(model, VecAdapter::with(rules)).unwrap();
        e.load_policy().await.unwrap();
        e
    }

    const ACL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
"#;

    const RBAC_DOMAINS: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

    const DENY_OVERRIDE: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

    const PRIORITY: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[policy_effect]
e = priority(p.eft) || deny

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
"#;

    const ABAC: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub.Age >= 18 && r.obj == "data1" && r.act == "read"
"#;

    #[tokio::test]
    async fn acl_allows_only_listed_triples() {
        let e = enforcer(ACL, vec![rule("p", &["alice", "data1", "read"])]).await;
        assert!(e.enforce(&texts(&["alice", "data1", "read"])).unwrap());
        assert!(!e.enforce(&texts(&["alice", "data1", "write"])).unwrap());
        assert!(!e.enforce(&texts(&["bob", "data1", "read"])).unwrap());
    }

    #[tokio::test]
    async fn policy_is_empty_until_loaded() {
        let model = Model::from_text(ACL).unwrap();
        let e = DefaultEnforcer::new(model, VecAdapter::with(vec![rule("p", &["alice", "data1", "read"])]))
            .unwrap();
        assert!(!e.enforce(&texts(&["alice", "data1", "read"])).unwrap());
        e.load_policy().await.unwrap();
        assert!(e.enforce(&texts(&["alice", "data1", "read"])).unwrap());
    }

    #[tokio::test]
    async fn roles_are_scoped_to_domains() {
        let e = enforcer(
            RBAC_DOMAINS,
            vec![
                rule("p", &["admin", "tenant1", "data1", "read"]),
                rule("g", &["alice", "admin", "tenant1"]),
            ],
        )
        .await;
        assert!(e.enforce(&texts(&["alice", "tenant1", "data1", "read"])).unwrap());
        assert!(!e.enforce(&texts(&["alice", "tenant2", "data1", "read"])).unwrap());
    }

    #[tokio::test]
    async fn deny_rules_override_inherited_allows() {
        let e = enforcer(
            DENY_OVERRIDE,
            vec![
                rule("p", &["staff", "/docs/*", "read", "allow"]),
                rule("p", &["bob", "/docs/secret", "read", "deny"]),
                rule("g", &["alice", "staff"]),
                rule("g", &["bob", "staff"]),
            ],
        )
        .await;
        assert!(e.enforce(&texts(&["alice", "/docs/secret", "read"])).unwrap());
        assert!(e.enforce(&texts(&["bob", "/docs/public", "read"])).unwrap());
        assert!(!e.enforce(&texts(&["bob", "/docs/secret", "read"])).unwrap());
    }

    #[tokio::test]
    async fn first_matching_rule_wins_under_priority() {
        let e = enforcer(
            PRIORITY,
            vec![
                rule("p", &["alice", "data1", "read", "deny"]),
                rule("p", &["alice", "data1", "read", "allow"]),
                rule("p", &["bob", "data1", "read", "allow"]),
            ],
        )
        .await;
        assert!(!e.enforce(&texts(&["alice", "data1", "read"])).unwrap());
        assert!(e.enforce(&texts(&["bob", "data1", "read"])).unwrap());
        assert!(!e.enforce(&texts(&["carol", "data1", "read"])).unwrap());
    }

    #[tokio::test]
    async fn attribute_matchers_work_without_policy_rules() {
        let e = enforcer(ABAC, vec![]).await;
        let adult = Value::from_json(serde_json::json!({ "Age": 30 })).unwrap();
        let minor = Value::from_json(serde_json::json!({ "Age": 12 })).unwrap();
        assert!(e.enforce(&[adult, Value::text("data1"), Value::text("read")]).unwrap());
        assert!(!e.enforce(&[minor, Value::text("data1"), Value::text("read")]).unwrap());
    }

    #[tokio::test]
    async fn role_edits_take_effect_immediately() {
        let e = enforcer(DENY_OVERRIDE, vec![rule("p", &["staff", "/docs/*", "read", "allow"])]).await;
        assert!(!e.enforce(&texts(&["carol", "/docs/a", "read"])).unwrap());

        assert!(e.add_policy("g", strings(&["carol", "staff"])).unwrap());
        assert!(!e.add_policy("g", strings(&["carol", "staff"])).unwrap());
        assert!(e.enforce(&texts(&["carol", "/docs/a", "read"])).unwrap());

        assert!(e.remove_policy("g", &strings(&["carol", "staff"])).unwrap());
        assert!(!e.enforce(&texts(&["carol", "/docs/a", "read"])).unwrap());
    }

    #[tokio::test]
    async fn policy_edits_are_validated() {
        let e = enforcer(ACL, vec![]).await;
        assert!(matches!(
            e.add_policy("p", strings(&["alice", "data1"])),
            Err(EngineError::Policy(_))
        ));
        assert!(matches!(
            e.add_policy("g", strings(&["alice", "admin"])),
            Err(EngineError::Policy(_))
        ));
        assert!(matches!(e.policy("p9"), Err(EngineError::Policy(_))));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_the_adapter() {
        let adapter = VecAdapter::with(vec![]);
        let model = Model::from_text(ACL).unwrap();
        let first = DefaultEnforcer::new(model.clone(), adapter.clone()).unwrap();
        first.add_policy("p", strings(&["alice", "data1", "read"])).unwrap();
        first.save_policy().await.unwrap();

        let second = DefaultEnforcer::new(model, adapter).unwrap();
        second.load_policy().await.unwrap();
        assert_eq!(second.policy("p").unwrap(), vec![strings(&["alice", "data1", "read"])]);
        assert!(second.enforce(&texts(&["alice", "data1", "read"])).unwrap());
    }

    #[tokio::test]
    async fn adapter_failures_leave_policy_untouched() {
        let model = Model::from_text(ACL).unwrap();
        let adapter = Arc::new(VecAdapter {
            rules: Mutex::new(vec![]),
            fail: true,
        });
        let e = DefaultEnforcer::new(model, adapter).unwrap();
        e.add_policy("p", strings(&["alice", "data1", "read"])).unwrap();

        assert!(matches!(e.load_policy().await, Err(EngineError::Adapter(_))));
        assert!(matches!(e.save_policy().await, Err(EngineError::Adapter(_))));
        assert!(e.enforce(&texts(&["alice", "data1", "read"])).unwrap());
    }
}
