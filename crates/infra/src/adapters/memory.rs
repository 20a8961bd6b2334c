use std::sync::RwLock;

use async_trait::async_trait;

use gatekeeper_engine::{Adapter, AdapterError, PolicyRule};

/// Process-local policy storage.
///
/// Intended for tests/dev; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rules: RwLock<Vec<PolicyRule>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn driver(&self) -> &str {
        "memory"
    }

    async fn load_policy(&self) -> Result<Vec<PolicyRule>, AdapterError> {
        let rules = self
            .rules
            .read()
            .map_err(|_| AdapterError::Io("lock poisoned".to_string()))?;
        Ok(rules.clone())
    }

    async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), AdapterError> {
        let mut stored = self
            .rules
            .write()
            .map_err(|_| AdapterError::Io("lock poisoned".to_string()))?;
        *stored = rules.to_vec();
        Ok(())
    }
}
