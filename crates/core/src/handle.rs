//! Caller-chosen identifiers for server-side resources.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// The two independent handle namespaces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Adapter,
    Enforcer,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Adapter => "adapter",
            ResourceKind::Enforcer => "enforcer",
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-empty, caller-assigned resource name.
///
/// Handles are opaque: the service never interprets them beyond equality.
/// Adapter and enforcer handles live in separate namespaces, so the same
/// string may name one of each.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Validate and wrap a handle name.
    ///
    /// Fails with `InvalidArgument` when the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, RpcError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RpcError::invalid_argument("handle name must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Handle::new(raw).map_err(|e| serde::de::Error::custom(e.message))
    }
}
