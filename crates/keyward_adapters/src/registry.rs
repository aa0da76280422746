use std::sync::Arc;

use keyward_core::config::Settings;
use keyward_core::entities::ProviderKind;
use keyward_core::ports::{AuthorizationBroker, IdentityProvider};
use keyward_core::providers::ProviderRegistry;
use keyward_core::Error;
use tracing::debug;

use crate::oauth::ManagedOAuthProvider;
use crate::offline::OfflineProvider;
use crate::self_hosted::SelfHostedProvider;

/// Register one provider per kind the configured backend offers
pub fn build_registry(
    settings: &Settings,
    broker: Arc<dyn AuthorizationBroker>,
) -> Result<ProviderRegistry, Error> {
    let mut registry = ProviderRegistry::new();

    for kind in settings.auth.available_providers() {
        let provider: Arc<dyn IdentityProvider> = match kind {
            ProviderKind::Offline => Arc::new(OfflineProvider::new()),
            ProviderKind::ManagedOauth => Arc::new(ManagedOAuthProvider::new(
                &settings.auth,
                &settings.network,
                broker.clone(),
            )?),
            ProviderKind::SelfHosted => {
                Arc::new(SelfHostedProvider::new(&settings.auth, &settings.network)?)
            }
        };
        debug!(provider = %kind, "registered identity provider");
        registry = registry.register(provider);
    }

    Ok(registry)
}
