//! In-memory port implementations shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::entities::{
    Account, AccountId, ClientConfig, Instance, InstanceId, LoginOutcome, LoginRequest,
    NewAccount, ProviderKind, TokenGrant,
};
use crate::error::{Error, RejectionReason};
use crate::ports::{AccountStore, Clock, IdentityProvider, InstanceCatalog, SessionHooks};

#[derive(Default)]
struct MemoryState {
    accounts: Vec<Account>,
    next_id: u64,
    config: ClientConfig,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_selection: AtomicBool,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, account: NewAccount, selected: bool) -> Account {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let account = account.into_account(AccountId::new(state.next_id));
        state.accounts.push(account.clone());
        if selected {
            state.config.selected_account_id = Some(account.id);
        }
        account
    }

    pub fn select_instance(&self, id: &str) {
        self.state.lock().unwrap().config.selected_instance_id = Some(InstanceId::new(id));
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Only `set_selected` fails; other writes go through
    pub fn fail_selection(&self) {
        self.fail_selection.store(true, Ordering::SeqCst);
    }

    pub fn config(&self) -> ClientConfig {
        self.state.lock().unwrap().config.clone()
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().accounts.len()
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn list_accounts(&self) -> Result<Vec<Account>, Error> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, Error> {
        Ok(self.account(id))
    }

    async fn get_selected(&self) -> Result<Option<Account>, Error> {
        let selected = self.state.lock().unwrap().config.selected_account_id;
        Ok(selected.and_then(|id| self.account(id)))
    }

    async fn put_account(&self, account: NewAccount) -> Result<Account, Error> {
        self.check_writable()?;
        Ok(self.seed(account, false))
    }

    async fn update_account(&self, account: &Account) -> Result<(), Error> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let existing = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or_else(|| Error::Store(format!("account {} not found", account.id)))?;
        *existing = account.clone();
        Ok(())
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), Error> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        state.accounts.retain(|a| a.id != id);
        if state.config.selected_account_id == Some(id) {
            state.config.selected_account_id = None;
        }
        Ok(())
    }

    async fn set_selected(&self, id: Option<AccountId>) -> Result<(), Error> {
        self.check_writable()?;
        if self.fail_selection.load(Ordering::SeqCst) {
            return Err(Error::Store("config write failed".to_string()));
        }
        self.state.lock().unwrap().config.selected_account_id = id;
        Ok(())
    }

    async fn client_config(&self) -> Result<ClientConfig, Error> {
        Ok(self.config())
    }

    async fn set_selected_instance(&self, id: Option<&InstanceId>) -> Result<(), Error> {
        self.check_writable()?;
        self.state.lock().unwrap().config.selected_instance_id = id.cloned();
        Ok(())
    }
}

pub struct StaticCatalog(pub Vec<Instance>);

#[async_trait]
impl InstanceCatalog for StaticCatalog {
    async fn instances(&self) -> Result<Vec<Instance>, Error> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    pub active: Mutex<Option<Account>>,
    pub home_visits: AtomicUsize,
}

impl RecordingHooks {
    pub fn active_name(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.display_name.clone())
    }

    pub fn home_visits(&self) -> usize {
        self.home_visits.load(Ordering::SeqCst)
    }
}

impl SessionHooks for RecordingHooks {
    fn set_active_account(&self, account: &Account) {
        *self.active.lock().unwrap() = Some(account.clone());
    }

    fn navigate_home(&self) {
        self.home_visits.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FixedClock(pub AtomicI64);

impl FixedClock {
    pub fn at(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Provider that replays queued results and counts calls
pub struct ScriptedProvider {
    kind: ProviderKind,
    logins: Mutex<VecDeque<Result<LoginOutcome, Error>>>,
    refreshes: Mutex<VecDeque<Result<TokenGrant, Error>>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    refresh_delay: Option<Duration>,
    login_gate: Option<Arc<Notify>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            logins: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay: None,
            login_gate: None,
        }
    }

    pub fn on_login(self, result: Result<LoginOutcome, Error>) -> Self {
        self.logins.lock().unwrap().push_back(result);
        self
    }

    pub fn on_refresh(self, result: Result<TokenGrant, Error>) -> Self {
        self.refreshes.lock().unwrap().push_back(result);
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// Block logins until the returned handle is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.login_gate = Some(gate);
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn login(&self, _request: &LoginRequest) -> Result<LoginOutcome, Error> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.login_gate {
            gate.notified().await;
        }
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Other("no scripted login".to_string())))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, Error> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::ProviderRejected(
                RejectionReason::InvalidRefreshToken,
            )))
    }
}

pub fn new_account(name: &str, provider: ProviderKind, expires_at: Option<i64>) -> NewAccount {
    NewAccount {
        display_name: name.to_string(),
        provider,
        access_token: format!("{}-access", name.to_lowercase()),
        refresh_token: match provider {
            ProviderKind::Offline => None,
            _ => Some(format!("{}-refresh", name.to_lowercase())),
        },
        expires_at,
        provider_meta: BTreeMap::new(),
    }
}

pub fn grant(access: &str, expires_in: u64) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: format!("{}-refresh", access),
        expires_in,
        uuid: None,
        name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_of_missing_account_is_a_store_error() {
        let store = MemoryAccountStore::new();
        let ghost = new_account("Ghost", ProviderKind::Offline, None).into_account(AccountId::new(9));

        let result = store.update_account(&ghost).await;

        assert!(matches!(result, Err(Error::Store(msg)) if msg.contains("account 9")));
        assert_eq!(store.len(), 0);
    }
}
