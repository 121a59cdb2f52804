//! Provider contract and registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use policy::{ActionKind, ActionParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors a provider can report.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum ProviderError {
    #[error("unsupported action: {0}")]
    Unsupported(ActionKind),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("execution failed: {0}")]
    Execution(String),
}

/// Performs the real side effect for one action kind.
///
/// This is the boundary between the broker and the outside world. Providers
/// are trusted to cooperate but must validate their own inputs.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError>;
}

/// Providers keyed by the kind they handle. Built once, before the broker.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ActionKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `kind`, replacing any earlier registration.
    pub fn with(mut self, kind: ActionKind, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError> {
            serde_json::to_value(params).map_err(|e| ProviderError::Execution(e.to_string()))
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_kind() {
        let registry = ProviderRegistry::new().with(ActionKind::Log, Arc::new(Echo));
        assert!(registry.contains(ActionKind::Log));
        assert!(registry.get(ActionKind::FileWrite).is_none());
        assert_eq!(registry.kinds(), vec![ActionKind::Log]);

        let provider = registry.get(ActionKind::Log).unwrap();
        let out = provider.execute(&ActionParams::log("hi")).await.unwrap();
        assert_eq!(out["kind"], json!("LOG"));
    }
}
