use std::sync::Arc;

use crate::entities::ProviderKind;
use crate::error::Error;
use crate::ports::IdentityProvider;

/// Maps each provider kind to its one implementation
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any earlier one of the same kind
    pub fn register(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        self.providers.push(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&Arc<dyn IdentityProvider>, Error> {
        self.providers
            .iter()
            .find(|p| p.kind() == kind)
            .ok_or(Error::ProviderUnavailable(kind))
    }

    /// Registered kinds, in registration order
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
