//! Engine and storage error model.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by a storage adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Filesystem or network IO failed.
    #[error("io error: {0}")]
    Io(String),

    /// The backing database rejected a statement or connection.
    #[error("database error: {0}")]
    Database(String),

    /// Stored policy data could not be interpreted.
    #[error("malformed policy data: {0}")]
    Format(String),
}

/// Engine-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The model text is syntactically invalid.
    #[error("model parse error: {0}")]
    ModelParse(String),

    /// The model parsed but cannot back an enforcer (unknown references,
    /// conflicting attribute usage, ...).
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The matcher could not be evaluated for a request.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A policy rule does not fit the model.
    #[error("invalid policy: {0}")]
    Policy(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl EngineError {
    pub fn model_parse(msg: impl Into<String>) -> Self {
        Self::ModelParse(msg.into())
    }

    pub fn invalid_model(msg: impl Into<String>) -> Self {
        Self::InvalidModel(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }
}
