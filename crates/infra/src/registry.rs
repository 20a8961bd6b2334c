//! Handle registry: two independent namespaces mapping caller-chosen names
//! to shared adapter and enforcer entries.
//!
//! ## Build-once semantics
//!
//! Each handle owns a once-cell. The namespace map lock is only held to find
//! or insert that cell, never while a build runs, so:
//!
//! - concurrent creates of one fresh handle run exactly one build and all
//!   callers observe the same instance;
//! - creates and lookups of other handles never wait on that build;
//! - a failed build stores nothing: its empty cell is dropped from the map
//!   unless another caller is still waiting on it, and the next create retries.
//!
//! Creation is idempotent by name only: an existing entry is returned as-is
//! even if the new request carries different parameters.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

use gatekeeper_core::{Handle, ResourceKind, RpcError, RpcResult};
use gatekeeper_engine::{Adapter, Enforcer, RequestSchema};

/// A registered storage adapter.
pub struct AdapterEntry {
    pub adapter: Arc<dyn Adapter>,
    pub driver: String,
    pub created_at: DateTime<Utc>,
}

/// A registered enforcer.
pub struct EnforcerEntry {
    pub enforcer: Arc<dyn Enforcer>,
    pub schema: RequestSchema,
    pub adapter: Handle,
    pub created_at: DateTime<Utc>,
}

/// Listing row for an adapter handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterSummary {
    pub handle: Handle,
    pub driver: String,
    pub created_at: DateTime<Utc>,
}

/// Listing row for an enforcer handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnforcerSummary {
    pub handle: Handle,
    pub adapter: Handle,
    pub created_at: DateTime<Utc>,
}

type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// One handle namespace.
struct Namespace<T> {
    kind: ResourceKind,
    slots: RwLock<HashMap<Handle, Slot<T>>>,
}

impl<T> Namespace<T> {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned(&self) -> RpcError {
        RpcError::internal(format!("{} registry lock poisoned", self.kind))
    }

    fn slot(&self, handle: &Handle) -> RpcResult<Slot<T>> {
        if let Some(slot) = self
            .slots
            .read()
            .map_err(|_| self.poisoned())?
            .get(handle)
        {
            return Ok(slot.clone());
        }

        let mut slots = self.slots.write().map_err(|_| self.poisoned())?;
        Ok(slots.entry(handle.clone()).or_default().clone())
    }

    async fn create_or_get<F, Fut>(&self, handle: &Handle, build: F) -> RpcResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let slot = self.slot(handle)?;
        let mut built = false;
        let ran = &mut built;
        let entry = match slot
            .get_or_try_init(|| async move {
                *ran = true;
                build().await.map(Arc::new)
            })
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                self.evict_empty(handle, &slot)?;
                return Err(e);
            }
        };

        if built {
            tracing::info!(kind = %self.kind, handle = %handle, "handle registered");
        } else {
            tracing::debug!(kind = %self.kind, handle = %handle, "handle already registered; reusing");
        }
        Ok(entry.clone())
    }

    /// Drop `slot` from the map if it is still the registered cell, still
    /// empty, and held only by the map and the caller.
    fn evict_empty(&self, handle: &Handle, slot: &Slot<T>) -> RpcResult<()> {
        let mut slots = self.slots.write().map_err(|_| self.poisoned())?;
        let unused = slots.get(handle).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if unused {
            slots.remove(handle);
        }
        Ok(())
    }

    fn get(&self, handle: &Handle) -> RpcResult<Arc<T>> {
        self.slots
            .read()
            .map_err(|_| self.poisoned())?
            .get(handle)
            .and_then(|slot| slot.get().cloned())
            .ok_or_else(|| RpcError::not_found(format!("{} '{handle}' not found", self.kind)))
    }

    /// Ready entries, sorted by handle.
    fn entries(&self) -> RpcResult<Vec<(Handle, Arc<T>)>> {
        let slots = self.slots.read().map_err(|_| self.poisoned())?;
        let mut ready: Vec<(Handle, Arc<T>)> = slots
            .iter()
            .filter_map(|(handle, slot)| slot.get().map(|entry| (handle.clone(), entry.clone())))
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ready)
    }
}

/// Concurrency-safe store of adapter and enforcer handles.
pub struct HandleRegistry {
    adapters: Namespace<AdapterEntry>,
    enforcers: Namespace<EnforcerEntry>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Namespace::new(ResourceKind::Adapter),
            enforcers: Namespace::new(ResourceKind::Enforcer),
        }
    }

    /// Return the adapter under `handle`, building it with `build` if absent.
    pub async fn create_or_get_adapter<F, Fut>(&self, handle: &Handle, build: F) -> RpcResult<Arc<AdapterEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RpcResult<AdapterEntry>>,
    {
        self.adapters.create_or_get(handle, build).await
    }

    /// Return the enforcer under `handle`, building it with `build` if absent.
    pub async fn create_or_get_enforcer<F, Fut>(&self, handle: &Handle, build: F) -> RpcResult<Arc<EnforcerEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RpcResult<EnforcerEntry>>,
    {
        self.enforcers.create_or_get(handle, build).await
    }

    pub fn get_adapter(&self, handle: &Handle) -> RpcResult<Arc<AdapterEntry>> {
        self.adapters.get(handle)
    }

    pub fn get_enforcer(&self, handle: &Handle) -> RpcResult<Arc<EnforcerEntry>> {
        self.enforcers.get(handle)
    }

    pub fn list_adapters(&self) -> RpcResult<Vec<AdapterSummary>> {
        Ok(self
            .adapters
            .entries()?
            .into_iter()
            .map(|(handle, entry)| AdapterSummary {
                handle,
                driver: entry.driver.clone(),
                created_at: entry.created_at,
            })
            .collect())
    }

    pub fn list_enforcers(&self) -> RpcResult<Vec<EnforcerSummary>> {
        Ok(self
            .enforcers
            .entries()?
            .into_iter()
            .map(|(handle, entry)| EnforcerSummary {
                handle,
                adapter: entry.adapter.clone(),
                created_at: entry.created_at,
            })
            .collect())
    }
}
