use async_trait::async_trait;

use crate::entities::{
    now_millis, Account, AccountId, AccountSecrets, BrokerOutcome, ClientConfig, Instance, InstanceId,
    LoginOutcome, LoginRequest, NewAccount, ProviderKind, TokenGrant,
};
use crate::error::Error;

// ============================================================================
// Persistence Ports
// ============================================================================

/// Durable account storage plus the client selection state
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// List all saved accounts
    async fn list_accounts(&self) -> Result<Vec<Account>, Error>;

    /// Get account by ID
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, Error>;

    /// Resolve the selected account; a dangling selection yields `None`
    async fn get_selected(&self) -> Result<Option<Account>, Error>;

    /// Insert a new account and return it with its assigned ID
    async fn put_account(&self, account: NewAccount) -> Result<Account, Error>;

    /// Overwrite an existing account
    async fn update_account(&self, account: &Account) -> Result<(), Error>;

    /// Delete account (no-op when missing)
    async fn delete_account(&self, id: AccountId) -> Result<(), Error>;

    /// Point the selection at an account, or clear it
    async fn set_selected(&self, id: Option<AccountId>) -> Result<(), Error>;

    /// Current client selection state
    async fn client_config(&self) -> Result<ClientConfig, Error>;

    /// Point the instance selection at an instance, or clear it
    async fn set_selected_instance(&self, id: Option<&InstanceId>) -> Result<(), Error>;
}

/// Secure storage for account tokens, keyed by account ID
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store or replace the tokens of an account
    async fn store_secrets(&self, id: AccountId, secrets: &AccountSecrets) -> Result<(), Error>;

    /// Retrieve the tokens of an account
    async fn get_secrets(&self, id: AccountId) -> Result<Option<AccountSecrets>, Error>;

    /// Delete the tokens of an account (no-op when missing)
    async fn delete_secrets(&self, id: AccountId) -> Result<(), Error>;
}

// ============================================================================
// Authentication Ports
// ============================================================================

/// One identity backend's login/refresh contract
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Interactive login. Bad input is reported as `Error::Validation`.
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, Error>;

    /// Exchange a refresh token for fresh tokens. All-or-nothing: any
    /// failure or malformed payload is an error.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error>;
}

/// Privileged helper that runs the browser side of an OAuth login
#[async_trait]
pub trait AuthorizationBroker: Send + Sync {
    /// Redirect target the authorization server must send the user back to
    fn redirect_uri(&self) -> String;

    /// Present `authorize_url` to the user and wait for the outcome
    async fn authorize(&self, authorize_url: &str) -> Result<BrokerOutcome, Error>;
}

// ============================================================================
// Collaborator Ports
// ============================================================================

/// Source of the ordered instance list
#[async_trait]
pub trait InstanceCatalog: Send + Sync {
    async fn instances(&self) -> Result<Vec<Instance>, Error>;
}

/// UI hooks fired once a session is active
pub trait SessionHooks: Send + Sync {
    fn set_active_account(&self, account: &Account);
    fn navigate_home(&self);
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}
