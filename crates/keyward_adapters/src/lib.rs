pub mod accounts;
pub mod broker;
pub mod configuration;
pub mod credentials;
pub mod instances;
pub mod network;
pub mod oauth;
pub mod offline;
pub mod registry;
pub mod self_hosted;
pub mod telemetry;
mod token;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use accounts::FileAccountStore;
pub use broker::LoopbackBroker;
pub use credentials::KeyringCredentialStore;
pub use instances::FileInstanceCatalog;
pub use oauth::ManagedOAuthProvider;
pub use offline::OfflineProvider;
pub use registry::build_registry;
pub use self_hosted::SelfHostedProvider;
