use async_trait::async_trait;
use keyward_core::entities::{AccountId, AccountSecrets};
use keyward_core::ports::CredentialStore;
use keyward_core::Error;
use keyring::Entry;
use tracing::{debug, instrument};

const SERVICE_NAME: &str = "keyward";
const TOKENS_PREFIX: &str = "tokens";

/// Keyring-backed token storage. Each account's tokens are one JSON entry
/// under `tokens:<account id>`.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Store under a different keyring service name
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn tokens_key(id: AccountId) -> String {
        format!("{}:{}", TOKENS_PREFIX, id)
    }

    fn get_entry(&self, id: AccountId) -> Result<Entry, Error> {
        Entry::new(&self.service, &Self::tokens_key(id))
            .map_err(|e| Error::CredentialStorage(format!("failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    #[instrument(skip(self, secrets))]
    async fn store_secrets(&self, id: AccountId, secrets: &AccountSecrets) -> Result<(), Error> {
        let entry = self.get_entry(id)?;
        let json = serde_json::to_string(secrets)
            .map_err(|e| Error::CredentialStorage(format!("failed to serialize tokens: {}", e)))?;

        debug!(account_id = %id, "storing tokens in keyring");

        tokio::task::spawn_blocking(move || {
            entry
                .set_password(&json)
                .map_err(|e| Error::CredentialStorage(format!("failed to store tokens: {}", e)))
        })
        .await
        .map_err(|e| Error::CredentialStorage(format!("task join error: {}", e)))?
    }

    #[instrument(skip(self))]
    async fn get_secrets(&self, id: AccountId) -> Result<Option<AccountSecrets>, Error> {
        let entry = self.get_entry(id)?;

        tokio::task::spawn_blocking(move || match entry.get_password() {
            Ok(json) => {
                let secrets: AccountSecrets = serde_json::from_str(&json).map_err(|e| {
                    Error::CredentialStorage(format!("failed to parse stored tokens: {}", e))
                })?;
                Ok(Some(secrets))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::CredentialStorage(format!(
                "failed to read tokens: {}",
                e
            ))),
        })
        .await
        .map_err(|e| Error::CredentialStorage(format!("task join error: {}", e)))?
    }

    #[instrument(skip(self))]
    async fn delete_secrets(&self, id: AccountId) -> Result<(), Error> {
        let entry = self.get_entry(id)?;

        tokio::task::spawn_blocking(move || match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::CredentialStorage(format!(
                "failed to delete tokens: {}",
                e
            ))),
        })
        .await
        .map_err(|e| Error::CredentialStorage(format!("task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_key() {
        assert_eq!(KeyringCredentialStore::tokens_key(AccountId::new(12)), "tokens:12");
    }

    // These need a working keyring service

    #[tokio::test]
    #[ignore = "requires keyring service"]
    async fn test_store_get_and_delete_tokens() {
        let store = KeyringCredentialStore::with_service("keyward-test");
        let id = AccountId::new(9_001);
        let _ = store.delete_secrets(id).await;

        let secrets = AccountSecrets {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
        };
        store.store_secrets(id, &secrets).await.unwrap();
        assert_eq!(store.get_secrets(id).await.unwrap(), Some(secrets));

        store.delete_secrets(id).await.unwrap();
        assert!(store.get_secrets(id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires keyring service"]
    async fn test_delete_missing_tokens_is_ok() {
        let store = KeyringCredentialStore::with_service("keyward-test");
        let id = AccountId::new(9_002);

        store.delete_secrets(id).await.unwrap();
        store.delete_secrets(id).await.unwrap();
    }
}
