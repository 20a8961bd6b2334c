//! Storage seam between an enforcer and wherever its policy lives.

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::policy::PolicyRule;

/// Policy storage.
///
/// Implementations are shared by every enforcer bound to the same adapter
/// handle, so they must tolerate concurrent calls.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Driver name the adapter was built for (`memory`, `sqlite`, ...).
    fn driver(&self) -> &str;

    /// Read every stored rule, in storage order.
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, AdapterError>;

    /// Replace the stored rules with `rules`.
    async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), AdapterError>;
}
