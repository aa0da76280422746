use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_core::entities::{
    Account, AccountId, AccountSecrets, ClientConfig, InstanceId, NewAccount, ProviderKind,
    META_UUID,
};
use keyward_core::ports::{AccountStore, CredentialStore};
use keyward_core::Error;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Account as written to `accounts.json`. Tokens are held by the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    id: AccountId,
    display_name: String,
    provider: ProviderKind,
    /// Access token expiry (Unix epoch milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(default)]
    provider_meta: BTreeMap<String, String>,
}

impl AccountRecord {
    fn from_account(account: &Account) -> Self {
        Self {
            id: account.id,
            display_name: account.display_name.clone(),
            provider: account.provider,
            expires_at: account.expires_at,
            provider_meta: account.provider_meta.clone(),
        }
    }

    /// Join the record with its tokens. Without stored tokens the account
    /// reads as expired with nothing to refresh, unless it is offline.
    fn into_account(self, secrets: Option<AccountSecrets>) -> Account {
        let (access_token, refresh_token, expires_at) = match secrets {
            Some(secrets) => (secrets.access_token, secrets.refresh_token, self.expires_at),
            None => {
                let offline_id = match self.provider {
                    ProviderKind::Offline => self.provider_meta.get(META_UUID).cloned(),
                    _ => None,
                };
                (offline_id.unwrap_or_default(), None, None)
            }
        };

        Account {
            id: self.id,
            display_name: self.display_name,
            provider: self.provider,
            access_token,
            refresh_token,
            expires_at,
            provider_meta: self.provider_meta,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
    #[serde(default)]
    config: ClientConfig,
}

impl StoreFile {
    fn allocate_id(&mut self) -> AccountId {
        let highest = self
            .accounts
            .iter()
            .map(|a| a.id.value())
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(highest) + 1;
        AccountId::new(self.next_id)
    }

    fn record(&self, id: AccountId) -> Option<AccountRecord> {
        self.accounts.iter().find(|a| a.id == id).cloned()
    }
}

/// File-based account store; accounts and the client selection share one
/// JSON file, tokens go to the credential store
pub struct FileAccountStore {
    store_path: PathBuf,
    secrets: Arc<dyn CredentialStore>,
}

impl FileAccountStore {
    pub fn new(config_dir: PathBuf, secrets: Arc<dyn CredentialStore>) -> Self {
        Self {
            store_path: config_dir.join("accounts.json"),
            secrets,
        }
    }

    pub fn store_path(&self) -> &PathBuf {
        &self.store_path
    }

    async fn load(&self) -> Result<StoreFile, Error> {
        if !fs::try_exists(&self.store_path).await.unwrap_or(false) {
            return Ok(StoreFile::default());
        }

        let content = fs::read_to_string(&self.store_path)
            .await
            .map_err(|e| Error::Store(format!("failed to read accounts file: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("failed to parse accounts file: {}", e)))
    }

    /// Write to a sibling temp file and rename over the original, so readers
    /// see either the old or the new contents
    async fn save(&self, store: &StoreFile) -> Result<(), Error> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Store(format!("failed to create config dir: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(store)
            .map_err(|e| Error::Store(format!("failed to serialize accounts: {}", e)))?;

        let tmp_path = self.store_path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| Error::Store(format!("failed to write accounts file: {}", e)))?;
        fs::rename(&tmp_path, &self.store_path)
            .await
            .map_err(|e| Error::Store(format!("failed to replace accounts file: {}", e)))?;
        Ok(())
    }

    async fn hydrate(&self, record: AccountRecord) -> Result<Account, Error> {
        let secrets = self.secrets.get_secrets(record.id).await?;
        if secrets.is_none() {
            warn!(account_id = %record.id, "no stored tokens for account");
        }
        Ok(record.into_account(secrets))
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    #[instrument(skip(self))]
    async fn list_accounts(&self) -> Result<Vec<Account>, Error> {
        let store = self.load().await?;
        let mut accounts = Vec::with_capacity(store.accounts.len());
        for record in store.accounts {
            accounts.push(self.hydrate(record).await?);
        }
        Ok(accounts)
    }

    #[instrument(skip(self))]
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, Error> {
        let store = self.load().await?;
        match store.record(id) {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn get_selected(&self) -> Result<Option<Account>, Error> {
        let store = self.load().await?;
        let Some(selected) = store.config.selected_account_id else {
            return Ok(None);
        };
        match store.record(selected) {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, account), fields(name = %account.display_name))]
    async fn put_account(&self, account: NewAccount) -> Result<Account, Error> {
        let mut store = self.load().await?;
        let id = store.allocate_id();
        let account = account.into_account(id);

        debug!(account_id = %id, provider = %account.provider, "saving new account");

        self.secrets.store_secrets(id, &account.secrets()).await?;
        store.accounts.push(AccountRecord::from_account(&account));

        if let Err(e) = self.save(&store).await {
            if let Err(cleanup) = self.secrets.delete_secrets(id).await {
                warn!(error = %cleanup, account_id = %id, "could not remove tokens of unsaved account");
            }
            return Err(e);
        }
        Ok(account)
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn update_account(&self, account: &Account) -> Result<(), Error> {
        let mut store = self.load().await?;

        let existing = store
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or_else(|| Error::Store(format!("account {} not found", account.id)))?;
        *existing = AccountRecord::from_account(account);

        let previous = self.secrets.get_secrets(account.id).await?;
        self.secrets
            .store_secrets(account.id, &account.secrets())
            .await?;

        if let Err(e) = self.save(&store).await {
            let restored = match &previous {
                Some(previous) => self.secrets.store_secrets(account.id, previous).await,
                None => self.secrets.delete_secrets(account.id).await,
            };
            if let Err(restore) = restored {
                warn!(error = %restore, "could not restore previous tokens");
            }
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: AccountId) -> Result<(), Error> {
        let mut store = self.load().await?;
        let before = store.accounts.len();
        store.accounts.retain(|a| a.id != id);

        // Clear selection if it was this account
        let was_selected = store.config.selected_account_id == Some(id);
        if was_selected {
            store.config.selected_account_id = None;
        }

        if store.accounts.len() == before && !was_selected {
            debug!("account already absent");
        } else {
            self.save(&store).await?;
        }

        // Also clears tokens left behind by an earlier failed delete
        self.secrets.delete_secrets(id).await
    }

    #[instrument(skip(self))]
    async fn set_selected(&self, id: Option<AccountId>) -> Result<(), Error> {
        let mut store = self.load().await?;

        // Verify account exists
        if let Some(id) = id {
            if !store.accounts.iter().any(|a| a.id == id) {
                return Err(Error::Store(format!("account {} not found", id)));
            }
        }

        store.config.selected_account_id = id;
        self.save(&store).await
    }

    #[instrument(skip(self))]
    async fn client_config(&self) -> Result<ClientConfig, Error> {
        Ok(self.load().await?.config)
    }

    #[instrument(skip(self))]
    async fn set_selected_instance(&self, id: Option<&InstanceId>) -> Result<(), Error> {
        let mut store = self.load().await?;
        store.config.selected_instance_id = id.cloned();
        self.save(&store).await
    }
}
