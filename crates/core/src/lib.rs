//! `gatekeeper-core`: shared building blocks for the enforcer service.
//!
//! This crate holds the types every layer agrees on: resource handles and the
//! structured error model reported to RPC callers. It has no IO.

pub mod error;
pub mod handle;

pub use error::{ErrorKind, RpcError, RpcResult};
pub use handle::{Handle, ResourceKind};
