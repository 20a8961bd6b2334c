//! Request dispatch: the operations exposed to RPC callers.
//!
//! ```text
//! call
//!   ↓
//! 1. Validate handle names (empty → InvalidArgument)
//!   ↓
//! 2. Resolve handles in the registry (absent → NotFound)
//!   ↓
//! 3. Build / coerce / evaluate through the engine
//!   ↓
//! 4. Map engine failures onto the RPC error kinds
//! ```
//!
//! Handles are always resolved before the engine is touched, so a bad handle
//! never costs an adapter connection or a model parse.

use std::sync::Arc;

use chrono::Utc;

use gatekeeper_core::{ErrorKind, Handle, RpcError, RpcResult};
use gatekeeper_engine::{CoercionError, EngineError};

use crate::factory::{
    AdapterFactory, DefaultEnforcerFactory, DriverAdapterFactory, EnforcerFactory,
};
use crate::registry::{AdapterEntry, AdapterSummary, EnforcerEntry, EnforcerSummary, HandleRegistry};

/// Map an engine failure onto an RPC error; adapter failures take `adapter_kind`.
fn engine_error(err: EngineError, adapter_kind: ErrorKind) -> RpcError {
    match err {
        EngineError::ModelParse(msg) => RpcError::model_parse(msg),
        EngineError::InvalidModel(msg) => RpcError::enforcer_init(msg),
        EngineError::Evaluation(msg) => RpcError::new(ErrorKind::Evaluation, msg),
        EngineError::Policy(msg) => RpcError::new(ErrorKind::Policy, msg),
        EngineError::Adapter(e) => RpcError::new(adapter_kind, e.to_string()),
    }
}

fn coercion_error(err: CoercionError) -> RpcError {
    match err {
        CoercionError::Arity { expected, found } => RpcError::arity_mismatch(expected, found),
        other => RpcError::param_type(other.to_string()),
    }
}

/// Executes RPC operations against the handle registry.
pub struct RequestDispatcher {
    registry: HandleRegistry,
    adapter_factory: Arc<dyn AdapterFactory>,
    enforcer_factory: Arc<dyn EnforcerFactory>,
}

impl RequestDispatcher {
    pub fn new(adapter_factory: Arc<dyn AdapterFactory>, enforcer_factory: Arc<dyn EnforcerFactory>) -> Self {
        Self {
            registry: HandleRegistry::new(),
            adapter_factory,
            enforcer_factory,
        }
    }

    /// Dispatcher over the built-in drivers and the default engine.
    pub fn with_defaults(sql_max_connections: u32) -> Self {
        Self::new(
            Arc::new(DriverAdapterFactory::new(sql_max_connections)),
            Arc::new(DefaultEnforcerFactory),
        )
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    fn enforcer(&self, name: &str) -> RpcResult<Arc<EnforcerEntry>> {
        self.registry.get_enforcer(&Handle::new(name)?)
    }

    /// `NewAdapter`: register a storage adapter under `name`.
    pub async fn new_adapter(
        &self,
        name: &str,
        driver: &str,
        connect_string: &str,
        table_prefix: &str,
    ) -> RpcResult<Handle> {
        let handle = Handle::new(name)?;
        let factory = self.adapter_factory.clone();
        let result = self
            .registry
            .create_or_get_adapter(&handle, || async move {
                let adapter = factory.build(driver, connect_string, table_prefix).await?;
                Ok(AdapterEntry {
                    adapter,
                    driver: driver.to_string(),
                    created_at: Utc::now(),
                })
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(handle = %handle, driver, error = %e, "adapter build failed");
        }
        result.map(|_| handle)
    }

    /// `NewEnforcer`: register an enforcer over an existing adapter handle.
    pub async fn new_enforcer(&self, name: &str, model_text: &str, adapter_name: &str) -> RpcResult<Handle> {
        let handle = Handle::new(name)?;
        let adapter_handle = Handle::new(adapter_name)?;
        let adapter = self.registry.get_adapter(&adapter_handle)?;

        let factory = self.enforcer_factory.clone();
        let owner = adapter_handle.clone();
        let result = self
            .registry
            .create_or_get_enforcer(&handle, || async move {
                let built = factory.build(model_text, adapter.adapter.clone()).await?;
                Ok(EnforcerEntry {
                    enforcer: built.enforcer,
                    schema: built.schema,
                    adapter: owner,
                    created_at: Utc::now(),
                })
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(handle = %handle, adapter = %adapter_handle, error = %e, "enforcer build failed");
        }
        result.map(|_| handle)
    }

    /// `Enforce`: coerce `params` per the enforcer's request schema and decide.
    pub fn enforce<S: AsRef<str>>(&self, name: &str, params: &[S]) -> RpcResult<bool> {
        let entry = self.enforcer(name)?;
        let request = entry.schema.coerce(params).map_err(coercion_error)?;
        let allowed = entry
            .enforcer
            .enforce(&request)
            .map_err(|e| engine_error(e, ErrorKind::Evaluation))?;
        tracing::debug!(handle = name, allowed, "enforce");
        Ok(allowed)
    }

    /// `LoadPolicy`: replace the enforcer's policy with the adapter's contents.
    pub async fn load_policy(&self, name: &str) -> RpcResult<()> {
        let entry = self.enforcer(name)?;
        entry
            .enforcer
            .load_policy()
            .await
            .map_err(|e| engine_error(e, ErrorKind::PolicyLoad))?;
        tracing::info!(handle = name, "policy loaded");
        Ok(())
    }

    /// `SavePolicy`: persist the enforcer's policy through its adapter.
    pub async fn save_policy(&self, name: &str) -> RpcResult<()> {
        let entry = self.enforcer(name)?;
        entry
            .enforcer
            .save_policy()
            .await
            .map_err(|e| engine_error(e, ErrorKind::PolicySave))?;
        tracing::info!(handle = name, "policy saved");
        Ok(())
    }

    /// `AddPolicy`: returns false if the rule was already present.
    pub fn add_policy(&self, name: &str, ptype: &str, params: Vec<String>) -> RpcResult<bool> {
        let entry = self.enforcer(name)?;
        let added = entry
            .enforcer
            .add_policy(ptype, params)
            .map_err(|e| engine_error(e, ErrorKind::Policy))?;
        tracing::debug!(handle = name, ptype, added, "add policy");
        Ok(added)
    }

    /// `RemovePolicy`: returns false if the rule was not present.
    pub fn remove_policy(&self, name: &str, ptype: &str, params: &[String]) -> RpcResult<bool> {
        let entry = self.enforcer(name)?;
        let removed = entry
            .enforcer
            .remove_policy(ptype, params)
            .map_err(|e| engine_error(e, ErrorKind::Policy))?;
        tracing::debug!(handle = name, ptype, removed, "remove policy");
        Ok(removed)
    }

    /// `GetPolicy`: current in-memory rules of one type.
    pub fn get_policy(&self, name: &str, ptype: &str) -> RpcResult<Vec<Vec<String>>> {
        let entry = self.enforcer(name)?;
        entry
            .enforcer
            .policy(ptype)
            .map_err(|e| engine_error(e, ErrorKind::Policy))
    }

    pub fn list_adapters(&self) -> RpcResult<Vec<AdapterSummary>> {
        self.registry.list_adapters()
    }

    pub fn list_enforcers(&self) -> RpcResult<Vec<EnforcerSummary>> {
        self.registry.list_enforcers()
    }
}
