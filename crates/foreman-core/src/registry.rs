// Provider registry
//
// Process-wide mapping from provider name to client, populated once at
// startup from configuration and shared read-only afterwards. Tests build
// private registries with mock clients.

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ProviderClient;

/// Immutable-after-startup map of provider clients
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own name. Registration is idempotent:
    /// registering the same name again replaces the previous client.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.providers.insert(client.name().to_string(), client);
    }

    /// O(1) lookup by stable name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderRequest, ProviderResponse};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct FakeClient {
        name: String,
    }

    #[async_trait]
    impl ProviderClient for FakeClient {
        fn name(&self) -> &str {
            &self.name
        }

        fn models(&self) -> Vec<String> {
            vec!["fake-1".to_string()]
        }

        async fn execute(
            &self,
            _request: ProviderRequest,
            _cancel: &CancellationToken,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Unavailable("fake".into()))
        }

        fn cost_estimate(&self, _tokens_in: u32, _tokens_out: u32, _model: &str) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FakeClient {
            name: "claude".into(),
        }));
        registry.register(Arc::new(FakeClient {
            name: "openai".into(),
        }));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("claude").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["claude", "openai"]);
    }

    #[test]
    fn test_registration_idempotent() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeClient {
            name: "claude".into(),
        }));
        registry.register(Arc::new(FakeClient {
            name: "claude".into(),
        }));
        assert_eq!(registry.len(), 1);
    }
}
