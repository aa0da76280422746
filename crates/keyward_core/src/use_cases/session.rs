use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::access::InstanceAccessGate;
use crate::entities::{Account, Instance, LoginOutcome, LoginRequest, LoginResult, SessionState};
use crate::error::Error;
use crate::ports::{AccountStore, Clock, InstanceCatalog, SessionHooks, SystemClock};
use crate::providers::ProviderRegistry;

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Owns the session lifecycle:
/// - Bootstrap from the persisted account selection
/// - Silent refresh of expired tokens, evicting accounts that cannot refresh
/// - Interactive login through the matching provider
/// - Instance reconciliation and UI hooks once a session is active
pub struct SessionManager<S, C, H>
where
    S: AccountStore,
    C: InstanceCatalog,
    H: SessionHooks,
{
    store: Arc<S>,
    providers: ProviderRegistry,
    gate: InstanceAccessGate<S, C>,
    hooks: Arc<H>,
    clock: Arc<dyn Clock>,
    refresh_timeout: Duration,
    state: RwLock<SessionState>,
    in_flight: AtomicBool,
}

/// Held while a bootstrap or login runs; a second attempt is rejected
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, Error> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::LoginInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S, C, H> SessionManager<S, C, H>
where
    S: AccountStore,
    C: InstanceCatalog,
    H: SessionHooks,
{
    pub fn new(
        store: Arc<S>,
        catalog: Arc<C>,
        providers: ProviderRegistry,
        hooks: Arc<H>,
    ) -> Self {
        Self {
            gate: InstanceAccessGate::new(store.clone(), catalog),
            store,
            providers,
            hooks,
            clock: Arc::new(SystemClock),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            state: RwLock::new(SessionState::Bootstrapping),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub fn gate(&self) -> &InstanceAccessGate<S, C> {
        &self.gate
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Resolve the selected account at startup and decide between an
    /// automatic login and the login screen.
    ///
    /// Flow:
    /// 1. Resolve the selected account; none -> login required
    /// 2. Offline or unexpired tokens -> logged in without provider traffic
    /// 3. Expired tokens -> one refresh attempt, bounded by the refresh timeout
    /// 4. Refresh failure of any kind -> evict the account, login required
    ///
    /// Returns the settled state. Only store failures surface as errors.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<SessionState, Error> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        self.transition(SessionState::Bootstrapping).await;

        let Some(account) = self.resolve_selected().await? else {
            self.transition(SessionState::NoAccount).await;
            return Ok(self
                .transition(SessionState::InteractiveLoginRequired)
                .await);
        };

        let id = account.id;
        self.transition(SessionState::CheckingRefresh(id)).await;

        match self.check_refresh(account).await? {
            Some(account) => {
                self.transition(SessionState::RefreshValid(id)).await;
                Ok(self.activate(account).await)
            }
            None => {
                self.transition(SessionState::RefreshFailed(id)).await;
                self.store.delete_account(id).await?;
                self.store.set_selected(None).await?;
                info!(account_id = %id, "evicted account after failed refresh");
                Ok(self
                    .transition(SessionState::InteractiveLoginRequired)
                    .await)
            }
        }
    }

    /// Run an interactive login with the provider matching `request`.
    ///
    /// Validation, rejection and network errors leave every persisted value
    /// untouched. A second-factor demand parks the manager in
    /// `AwaitingSecondFactor` until the credentials are resubmitted with the
    /// code or `cancel_second_factor` is called.
    #[instrument(skip(self, request), fields(provider = %request.kind()))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResult, Error> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        let provider = self.providers.get(request.kind())?;

        let outcome = match provider.login(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_retryable() {
                    warn!(error = %e, "login failed, user may retry");
                } else {
                    debug!(error = %e, "login failed");
                }
                return Err(e);
            }
        };

        match outcome {
            LoginOutcome::Cancelled => {
                info!("login cancelled by user");
                Ok(LoginResult::Cancelled)
            }
            LoginOutcome::SecondFactorRequired { username } => {
                self.transition(SessionState::AwaitingSecondFactor { username })
                    .await;
                Ok(LoginResult::SecondFactorRequired)
            }
            LoginOutcome::Authenticated(new_account) => {
                let account = self.store.put_account(new_account).await?;
                if let Err(e) = self.store.set_selected(Some(account.id)).await {
                    // Leave no unselected account behind
                    warn!(error = %e, account_id = %account.id, "selecting new account failed");
                    if let Err(rollback) = self.store.delete_account(account.id).await {
                        warn!(error = %rollback, account_id = %account.id, "could not remove unselected account");
                    }
                    return Err(e);
                }
                info!(account_id = %account.id, name = %account.display_name, "login successful");
                self.activate(account.clone()).await;
                Ok(LoginResult::LoggedIn(account))
            }
        }
    }

    /// Leave the second-factor step and return to the credentials form
    pub async fn cancel_second_factor(&self) -> SessionState {
        let mut state = self.state.write().await;
        if matches!(*state, SessionState::AwaitingSecondFactor { .. }) {
            debug!("second-factor step cancelled");
            *state = SessionState::InteractiveLoginRequired;
        }
        state.clone()
    }

    /// Check the persisted selection against the instance whitelist before a
    /// launch. The account is re-read from the store, never cached.
    #[instrument(skip(self))]
    pub async fn authorize_launch(&self) -> Result<(Account, Instance), Error> {
        let account = self
            .store
            .get_selected()
            .await?
            .ok_or(Error::NoActiveAccount)?;
        let instance = self.gate.authorize_launch(&account).await?;
        Ok((account, instance))
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    async fn transition(&self, next: SessionState) -> SessionState {
        debug!(state = ?next, "session state");
        *self.state.write().await = next.clone();
        next
    }

    /// Selected account, clearing a selection that points at a deleted account
    async fn resolve_selected(&self) -> Result<Option<Account>, Error> {
        let config = self.store.client_config().await?;
        let Some(id) = config.selected_account_id else {
            return Ok(None);
        };

        match self.store.get_account(id).await? {
            Some(account) => Ok(Some(account)),
            None => {
                warn!(account_id = %id, "selected account no longer exists");
                self.store.set_selected(None).await?;
                Ok(None)
            }
        }
    }

    /// The only place expiry is decided. `None` means the account cannot be
    /// used and must be evicted.
    async fn check_refresh(&self, account: Account) -> Result<Option<Account>, Error> {
        if !account.needs_refresh(self.clock.now_millis()) {
            debug!(account_id = %account.id, "token still valid, no refresh needed");
            return Ok(Some(account));
        }

        let Some(refresh_token) = account.refresh_token.as_deref() else {
            warn!(account_id = %account.id, "expired account has no refresh token");
            return Ok(None);
        };

        let provider = match self.providers.get(account.provider) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "cannot refresh account");
                return Ok(None);
            }
        };

        info!(account_id = %account.id, provider = %account.provider, "refreshing access token");

        let grant = match tokio::time::timeout(self.refresh_timeout, provider.refresh(refresh_token))
            .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) => {
                warn!(error = %e, "token refresh failed");
                return Ok(None);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.refresh_timeout.as_secs(),
                    "token refresh timed out"
                );
                return Ok(None);
            }
        };

        let refreshed = account.with_grant(&grant, self.clock.now_millis());
        self.store.update_account(&refreshed).await?;
        info!(account_id = %refreshed.id, "token refreshed");
        Ok(Some(refreshed))
    }

    async fn activate(&self, account: Account) -> SessionState {
        if let Err(e) = self.gate.reconcile(&account).await {
            warn!(error = %e, "instance reconciliation failed");
        }
        self.hooks.set_active_account(&account);
        self.hooks.navigate_home();
        self.transition(SessionState::AutoLoggedIn(account)).await
    }
}
