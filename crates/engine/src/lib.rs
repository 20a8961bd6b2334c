//! `gatekeeper-engine`: the policy engine behind every enforcer handle.
//!
//! The service layer treats this crate as an opaque collaborator: it parses a
//! model, builds an [`Enforcer`] over an [`Adapter`], and asks for decisions.
//!
//! ## Model text
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
//! ```
//!
//! Request attributes are typed through a [`RequestSchema`] derived once per
//! model, so enforcement never has to inspect or rewrite the matcher per call.

pub mod adapter;
pub mod effect;
pub mod enforcer;
pub mod error;
pub mod eval;
pub mod expr;
pub mod functions;
pub mod model;
pub mod policy;
pub mod roles;
pub mod schema;
pub mod value;

pub use adapter::Adapter;
pub use effect::Effect;
pub use enforcer::{DefaultEnforcer, Enforcer};
pub use error::{AdapterError, EngineError, EngineResult};
pub use model::Model;
pub use policy::{PolicyRule, PolicySet};
pub use roles::RoleGraph;
pub use schema::{AttributeKind, CoercionError, RequestSchema};
pub use value::Value;
