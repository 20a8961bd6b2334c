//! Service error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the service layer.
pub type RpcResult<T> = Result<T, RpcError>;

/// Closed set of failure kinds reported to RPC callers.
///
/// Every kind is recoverable from the server's point of view: a failed call
/// never leaves the registry in a partial state and never stops the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A request field was missing or malformed (e.g. an empty handle name).
    InvalidArgument,
    /// A handle did not resolve to a registered resource.
    NotFound,
    /// No storage driver is registered under the requested name.
    UnsupportedDriver,
    /// The storage driver failed to open its connection.
    AdapterInit,
    /// The model text could not be parsed.
    ModelParse,
    /// The engine rejected the model (or the model/adapter pairing).
    EnforcerInit,
    /// An enforcement parameter did not parse as its declared kind.
    ParamType,
    /// The number of enforcement parameters differs from the model's request arity.
    ArityMismatch,
    /// The matcher could not be evaluated for the given request.
    Evaluation,
    /// A policy edit was rejected (unknown policy type, wrong rule arity).
    Policy,
    /// Reading policy from the adapter failed.
    PolicyLoad,
    /// Persisting policy through the adapter failed.
    PolicySave,
    /// The server itself failed (e.g. a poisoned lock); not the caller's fault.
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnsupportedDriver => "unsupported_driver",
            ErrorKind::AdapterInit => "adapter_init",
            ErrorKind::ModelParse => "model_parse",
            ErrorKind::EnforcerInit => "enforcer_init",
            ErrorKind::ParamType => "param_type",
            ErrorKind::ArityMismatch => "arity_mismatch",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::Policy => "policy",
            ErrorKind::PolicyLoad => "policy_load",
            ErrorKind::PolicySave => "policy_save",
            ErrorKind::Internal => "internal",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured failure returned by every service operation (kind + message).
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn unsupported_driver(driver: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedDriver,
            format!("unsupported driver '{driver}'"),
        )
    }

    pub fn adapter_init(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AdapterInit, msg)
    }

    pub fn model_parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelParse, msg)
    }

    pub fn enforcer_init(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::EnforcerInit, msg)
    }

    pub fn param_type(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParamType, msg)
    }

    pub fn arity_mismatch(expected: usize, found: usize) -> Self {
        Self::new(
            ErrorKind::ArityMismatch,
            format!("expected {expected} parameters, found {found}"),
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_code_and_message() {
        let err = RpcError::not_found("enforcer 'e1' not found");
        assert_eq!(err.to_string(), "not_found: enforcer 'e1' not found");
    }

    #[test]
    fn kinds_serialize_as_their_wire_code() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::UnsupportedDriver,
            ErrorKind::ArityMismatch,
            ErrorKind::PolicySave,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.code().to_string()));
        }
    }

    #[test]
    fn arity_mismatch_message_names_both_counts() {
        let err = RpcError::arity_mismatch(3, 2);
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
        assert!(err.message.contains('3') && err.message.contains('2'));
    }
}
