//! Factories that turn RPC parameters into adapters and enforcers.
//!
//! Both are traits so the registry and dispatcher can be exercised with
//! counting or failing stand-ins.

use std::sync::Arc;

use async_trait::async_trait;

use gatekeeper_core::RpcError;
use gatekeeper_engine::{Adapter, DefaultEnforcer, EngineError, Enforcer, Model, RequestSchema};

use crate::adapters::{AdapterBuildError, FileAdapter, MemoryAdapter, PostgresAdapter, SqliteAdapter};

/// Default pool size for SQL adapters.
pub const DEFAULT_SQL_MAX_CONNECTIONS: u32 = 5;

/// Builds storage adapters from `(driver, connect string, table prefix)`.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Unknown driver → `UnsupportedDriver`; connection failure → `AdapterInit`.
    async fn build(
        &self,
        driver: &str,
        connect_string: &str,
        table_prefix: &str,
    ) -> Result<Arc<dyn Adapter>, RpcError>;
}

/// An enforcer plus the request schema derived from its model.
pub struct BuiltEnforcer {
    pub enforcer: Arc<dyn Enforcer>,
    pub schema: RequestSchema,
}

/// Builds enforcers from model text and an adapter.
#[async_trait]
pub trait EnforcerFactory: Send + Sync {
    /// Malformed model → `ModelParse`; model the engine cannot run → `EnforcerInit`.
    ///
    /// The returned enforcer has not loaded any policy.
    async fn build(&self, model_text: &str, adapter: Arc<dyn Adapter>) -> Result<BuiltEnforcer, RpcError>;
}

/// The driver table used by the server.
#[derive(Debug, Clone)]
pub struct DriverAdapterFactory {
    max_connections: u32,
}

impl Default for DriverAdapterFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SQL_MAX_CONNECTIONS)
    }
}

impl DriverAdapterFactory {
    pub fn new(max_connections: u32) -> Self {
        Self { max_connections }
    }
}

fn adapter_init(driver: &str, err: AdapterBuildError) -> RpcError {
    RpcError::adapter_init(format!("{driver} adapter: {err}"))
}

#[async_trait]
impl AdapterFactory for DriverAdapterFactory {
    async fn build(
        &self,
        driver: &str,
        connect_string: &str,
        table_prefix: &str,
    ) -> Result<Arc<dyn Adapter>, RpcError> {
        let adapter: Arc<dyn Adapter> = match driver {
            "memory" => Arc::new(MemoryAdapter::new()),
            "file" => {
                if connect_string.is_empty() {
                    return Err(adapter_init(
                        driver,
                        AdapterBuildError::ConnectString("a policy file path is required".to_string()),
                    ));
                }
                Arc::new(FileAdapter::new(connect_string))
            }
            "sqlite" | "sqlite3" => Arc::new(
                SqliteAdapter::connect(connect_string, table_prefix, self.max_connections)
                    .await
                    .map_err(|e| adapter_init(driver, e))?,
            ),
            "postgres" | "postgresql" => Arc::new(
                PostgresAdapter::connect(connect_string, table_prefix, self.max_connections)
                    .await
                    .map_err(|e| adapter_init(driver, e))?,
            ),
            other => return Err(RpcError::unsupported_driver(other)),
        };
        Ok(adapter)
    }
}

/// Builds [`DefaultEnforcer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEnforcerFactory;

#[async_trait]
impl EnforcerFactory for DefaultEnforcerFactory {
    async fn build(&self, model_text: &str, adapter: Arc<dyn Adapter>) -> Result<BuiltEnforcer, RpcError> {
        let model = Model::from_text(model_text).map_err(|e| match e {
            EngineError::ModelParse(msg) => RpcError::model_parse(msg),
            other => RpcError::enforcer_init(other.to_string()),
        })?;
        let schema = RequestSchema::derive(&model).map_err(|e| RpcError::enforcer_init(e.to_string()))?;
        let enforcer = DefaultEnforcer::new(model, adapter).map_err(|e| RpcError::enforcer_init(e.to_string()))?;
        Ok(BuiltEnforcer {
            enforcer: Arc::new(enforcer),
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::ErrorKind;

    const MODEL: &str = "[request_definition]\nr = sub, obj, act\n\n[policy_definition]\np = sub, obj, act\n\n\
                         [policy_effect]\ne = some(where (p.eft == allow))\n\n[matchers]\n\
                         m = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n";

    async fn build_err(driver: &str, connect: &str, prefix: &str) -> ErrorKind {
        match DriverAdapterFactory::default().build(driver, connect, prefix).await {
            Ok(_) => panic!("expected {driver} adapter to fail"),
            Err(e) => e.kind(),
        }
    }

    #[tokio::test]
    async fn drivers_are_selected_by_name() {
        let factory = DriverAdapterFactory::default();
        assert_eq!(factory.build("memory", "", "").await.unwrap().driver(), "memory");
        assert_eq!(
            factory.build("sqlite3", "file::memory:", "").await.unwrap().driver(),
            "sqlite"
        );
    }

    #[tokio::test]
    async fn unknown_drivers_and_bad_parameters_are_classified() {
        assert_eq!(build_err("mongodb", "", "").await, ErrorKind::UnsupportedDriver);
        assert_eq!(build_err("file", "", "").await, ErrorKind::AdapterInit);
        assert_eq!(build_err("sqlite", ":memory:", "no spaces").await, ErrorKind::AdapterInit);
        assert_eq!(
            build_err("postgres", "not a url", "").await,
            ErrorKind::AdapterInit
        );
    }

    #[tokio::test]
    async fn model_errors_map_to_their_kinds() {
        let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
        let factory = DefaultEnforcerFactory;

        let parse = factory.build("[matchers]\nm = (", adapter.clone()).await.err().unwrap();
        assert_eq!(parse.kind(), ErrorKind::ModelParse);

        let unknown_attr = MODEL.replace("r.act == p.act", "r.action == p.act");
        let init = factory.build(&unknown_attr, adapter.clone()).await.err().unwrap();
        assert_eq!(init.kind(), ErrorKind::EnforcerInit);

        let built = factory.build(MODEL, adapter).await.unwrap();
        assert_eq!(built.schema.arity(), 3);
    }
}
