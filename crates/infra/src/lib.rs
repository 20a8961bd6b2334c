//! Infrastructure layer: storage adapters, factories, the handle registry and
//! the request dispatcher that RPC surfaces call into.

pub mod adapters;
pub mod dispatcher;
pub mod factory;
pub mod registry;


pub use dispatcher::RequestDispatcher;
pub use factory::{AdapterFactory, DefaultEnforcerFactory, DriverAdapterFactory, EnforcerFactory};
pub use registry::{AdapterSummary, EnforcerSummary, HandleRegistry};
