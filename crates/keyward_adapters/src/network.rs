//! Shared HTTP client configuration for identity provider calls.
//!
//! Every provider request is bounded by the configured request and connect
//! timeouts; a timed-out request surfaces as `Error::Timeout`.

use keyward_core::config::NetworkSettings;
use keyward_core::Error;
use reqwest::Client;

/// User agent sent to identity providers
pub const USER_AGENT: &str = concat!("keyward/", env!("CARGO_PKG_VERSION"));

/// Build a configured HTTP client for provider requests.
///
/// This client is configured with:
/// - Cookie store disabled (providers are stateless between calls)
/// - Request and connect timeouts from settings
pub fn build_provider_client(settings: &NetworkSettings) -> Result<Client, Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(settings.timeout())
        .connect_timeout(settings.connect_timeout())
        .build()
        .map_err(|e| Error::Network(format!("failed to create provider HTTP client: {}", e)))
}

/// Map a transport failure, keeping timeouts distinguishable
pub(crate) fn transport_error(e: reqwest::Error, settings: &NetworkSettings) -> Error {
    if e.is_timeout() {
        Error::Timeout(settings.timeout_secs)
    } else {
        Error::Network(e.to_string())
    }
}
