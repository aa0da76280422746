use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Store-assigned account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u64);

impl AccountId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity backend an account was issued by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Offline,
    ManagedOauth,
    SelfHosted,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Offline => "offline",
            ProviderKind::ManagedOauth => "managed-oauth",
            ProviderKind::SelfHosted => "self-hosted",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ProviderKind::Offline,
            ProviderKind::ManagedOauth,
            ProviderKind::SelfHosted,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

/// Placeholder printed in place of secrets by `Debug`
const REDACTED: &str = "<redacted>";

fn redact(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| REDACTED)
}

/// Stored credential set for one player
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub provider: ProviderKind,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix epoch milliseconds)
    pub expires_at: Option<i64>,
    /// Opaque per-provider fields (profile uuid and the like)
    pub provider_meta: BTreeMap<String, String>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("provider", &self.provider)
            .field("access_token", &REDACTED)
            .field("refresh_token", &redact(self.refresh_token.as_ref()))
            .field("expires_at", &self.expires_at)
            .field("provider_meta", &self.provider_meta)
            .finish()
    }
}

impl Account {
    /// Whether the access token must be exchanged before it can be used.
    ///
    /// Offline accounts never expire. Any other account without an expiry
    /// is treated as expired.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        match self.provider {
            ProviderKind::Offline => false,
            _ => match self.expires_at {
                Some(expires_at) => now_ms >= expires_at,
                None => true,
            },
        }
    }

    /// Build the refreshed account. The original is left untouched so a
    /// failed store write never leaves a half-updated value behind.
    pub fn with_grant(&self, grant: &TokenGrant, now_ms: i64) -> Account {
        let mut refreshed = self.clone();
        refreshed.access_token = grant.access_token.clone();
        refreshed.refresh_token = Some(grant.refresh_token.clone());
        refreshed.expires_at = Some(grant.expires_at(now_ms));
        if let Some(name) = &grant.name {
            refreshed.display_name = name.clone();
        }
        if let Some(uuid) = &grant.uuid {
            refreshed
                .provider_meta
                .insert(META_UUID.to_string(), uuid.clone());
        }
        refreshed
    }

    /// Token half of the account, kept apart from the account file
    pub fn secrets(&self) -> AccountSecrets {
        AccountSecrets {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Tokens of one account as held by a `CredentialStore`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSecrets {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for AccountSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecrets")
            .field("access_token", &REDACTED)
            .field("refresh_token", &redact(self.refresh_token.as_ref()))
            .finish()
    }
}

/// Key under which providers record the player's profile identifier
pub const META_UUID: &str = "uuid";

/// Account produced by an interactive login, before the store assigns an id
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub display_name: String,
    pub provider: ProviderKind,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub provider_meta: BTreeMap<String, String>,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("display_name", &self.display_name)
            .field("provider", &self.provider)
            .field("access_token", &REDACTED)
            .field("refresh_token", &redact(self.refresh_token.as_ref()))
            .field("expires_at", &self.expires_at)
            .field("provider_meta", &self.provider_meta)
            .finish()
    }
}

impl NewAccount {
    /// Build an account from a token grant. `fallback_name` is used when the
    /// backend does not report a profile name.
    pub fn from_grant(
        provider: ProviderKind,
        grant: TokenGrant,
        fallback_name: Option<&str>,
        now_ms: i64,
    ) -> Result<Self, Error> {
        let display_name = grant
            .name
            .clone()
            .or_else(|| fallback_name.map(str::to_string))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::InvalidServerResponse("token response carries no profile name".to_string())
            })?;

        let mut provider_meta = BTreeMap::new();
        if let Some(uuid) = &grant.uuid {
            provider_meta.insert(META_UUID.to_string(), uuid.clone());
        }

        Ok(Self {
            display_name,
            provider,
            expires_at: Some(grant.expires_at(now_ms)),
            access_token: grant.access_token,
            refresh_token: Some(grant.refresh_token),
            provider_meta,
        })
    }

    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            display_name: self.display_name,
            provider: self.provider,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            provider_meta: self.provider_meta,
        }
    }
}

/// Fully parsed token response from a provider
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
    pub uuid: Option<String>,
    pub name: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &REDACTED)
            .field("refresh_token", &REDACTED)
            .field("expires_in", &self.expires_in)
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .finish()
    }
}

impl TokenGrant {
    pub fn expires_at(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add((self.expires_in as i64).saturating_mul(1000))
    }
}

/// Credentials for password-based backends (never persisted to disk)
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub otp: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("otp", &redact(self.otp.as_ref()))
            .finish()
    }
}

impl Credentials {
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password,
            otp: None,
        }
    }

    pub fn with_otp(mut self, otp: String) -> Self {
        self.otp = Some(otp);
        self
    }
}

/// Input to an interactive login, one variant per provider
#[derive(Debug, Clone)]
pub enum LoginRequest {
    Offline { display_name: String },
    ManagedOauth,
    Password(Credentials),
}

impl LoginRequest {
    pub fn kind(&self) -> ProviderKind {
        match self {
            LoginRequest::Offline { .. } => ProviderKind::Offline,
            LoginRequest::ManagedOauth => ProviderKind::ManagedOauth,
            LoginRequest::Password(_) => ProviderKind::SelfHosted,
        }
    }
}

/// What a provider's interactive login produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(NewAccount),
    /// Resubmit the same credentials with a second-factor code
    SecondFactorRequired { username: String },
    /// The user closed the login window; not an error
    Cancelled,
}

/// What an authorization broker returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOutcome {
    Code(String),
    Cancelled,
}

/// Identifier of an externally supplied instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Game profile / server target, read-only to this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    #[serde(default, alias = "whitelistActive")]
    pub whitelist_enabled: bool,
    #[serde(default, alias = "whitelist")]
    pub whitelisted_names: HashSet<String>,
}

impl Instance {
    pub fn open(id: &str) -> Self {
        Self {
            id: InstanceId::new(id),
            whitelist_enabled: false,
            whitelisted_names: HashSet::new(),
        }
    }

    pub fn whitelisted<I, S>(id: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: InstanceId::new(id),
            whitelist_enabled: true,
            whitelisted_names: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// Persisted client selection state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub selected_account_id: Option<AccountId>,
    #[serde(default)]
    pub selected_instance_id: Option<InstanceId>,
}

/// Session lifecycle state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Bootstrapping,
    NoAccount,
    CheckingRefresh(AccountId),
    RefreshValid(AccountId),
    RefreshFailed(AccountId),
    AutoLoggedIn(Account),
    InteractiveLoginRequired,
    /// Self-hosted backend asked for a code; credentials are resubmitted with it
    AwaitingSecondFactor { username: String },
}

/// Result of an interactive login driven through the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    LoggedIn(Account),
    SecondFactorRequired,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn account(provider: ProviderKind, expires_at: Option<i64>) -> Account {
        Account {
            id: AccountId::new(1),
            display_name: "Steve".to_string(),
            provider,
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
            provider_meta: BTreeMap::new(),
        }
    }

    fn grant() -> TokenGrant {
        TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: "new-refresh".to_string(),
            expires_in: 3600,
            uuid: Some("0f3c".to_string()),
            name: None,
        }
    }

    #[rstest]
    #[case(None, 0)]
    #[case(Some(0), 1_000)]
    #[case(Some(1_000), 0)]
    #[case(Some(i64::MIN), i64::MAX)]
    fn test_offline_never_needs_refresh(#[case] expires_at: Option<i64>, #[case] now: i64) {
        assert!(!account(ProviderKind::Offline, expires_at).needs_refresh(now));
    }

    #[rstest]
    #[case(ProviderKind::ManagedOauth, None, 0, true)]
    #[case(ProviderKind::ManagedOauth, Some(1_000), 999, false)]
    #[case(ProviderKind::ManagedOauth, Some(1_000), 1_000, true)]
    #[case(ProviderKind::SelfHosted, Some(1_000), 5_000, true)]
    #[case(ProviderKind::SelfHosted, None, i64::MIN, true)]
    fn test_needs_refresh(
        #[case] provider: ProviderKind,
        #[case] expires_at: Option<i64>,
        #[case] now: i64,
        #[case] expected: bool,
    ) {
        assert_eq!(account(provider, expires_at).needs_refresh(now), expected);
    }

    #[test]
    fn test_with_grant_replaces_tokens() {
        let original = account(ProviderKind::ManagedOauth, Some(500));
        let refreshed = original.with_grant(&grant(), 10_000);

        assert_eq!(refreshed.id, original.id);
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(refreshed.expires_at, Some(10_000 + 3_600_000));
        assert_eq!(refreshed.display_name, "Steve");
        assert_eq!(refreshed.provider_meta.get(META_UUID).map(String::as_str), Some("0f3c"));

        // Source value is not modified
        assert_eq!(original.access_token, "access");
    }

    #[test]
    fn test_with_grant_renames_when_profile_changes() {
        let mut g = grant();
        g.name = Some("Alex".to_string());
        let refreshed = account(ProviderKind::SelfHosted, None).with_grant(&g, 0);
        assert_eq!(refreshed.display_name, "Alex");
    }

    #[test]
    fn test_new_account_from_grant() {
        let mut g = grant();
        g.name = Some("Alice".to_string());
        let new = NewAccount::from_grant(ProviderKind::ManagedOauth, g, None, 1_000).unwrap();

        assert_eq!(new.display_name, "Alice");
        assert_eq!(new.expires_at, Some(1_000 + 3_600_000));

        let stored = new.into_account(AccountId::new(7));
        assert_eq!(stored.id.value(), 7);
        assert_eq!(stored.refresh_token.as_deref(), Some("new-refresh"));
    }

    #[test]
    fn test_new_account_falls_back_to_login_name() {
        let new =
            NewAccount::from_grant(ProviderKind::SelfHosted, grant(), Some("bob"), 0).unwrap();
        assert_eq!(new.display_name, "bob");
    }

    #[test]
    fn test_new_account_without_name_is_malformed() {
        let result = NewAccount::from_grant(ProviderKind::ManagedOauth, grant(), None, 0);
        assert!(matches!(result, Err(Error::InvalidServerResponse(_))));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let mut stored = account(ProviderKind::SelfHosted, Some(1_000));
        stored.access_token = "at-4f9a".to_string();
        stored.refresh_token = Some("rt-77c1".to_string());

        let mut g = grant();
        g.access_token = "at-4f9a".to_string();
        g.refresh_token = "rt-77c1".to_string();
        g.name = Some("Steve".to_string());
        let new = NewAccount::from_grant(ProviderKind::SelfHosted, g.clone(), None, 0).unwrap();

        let creds =
            Credentials::new("steve".to_string(), "pw-91d2".to_string()).with_otp("otp-5508".into());

        let rendered = [
            format!("{:?}", stored),
            format!("{:?}", stored.secrets()),
            format!("{:?}", new),
            format!("{:?}", g),
            format!("{:?}", creds),
            format!("{:?}", SessionState::AutoLoggedIn(stored.clone())),
            format!("{:?}", LoginOutcome::Authenticated(new.clone())),
        ];
        for output in &rendered {
            for secret in ["at-4f9a", "rt-77c1", "pw-91d2", "otp-5508"] {
                assert!(!output.contains(secret), "{} leaked in {}", secret, output);
            }
            assert!(output.contains("<redacted>"), "{}", output);
        }

        // Non-secret fields stay readable
        assert!(rendered[0].contains("Steve"));
        assert!(rendered[4].contains("steve"));
    }

    #[test]
    fn test_account_without_refresh_token_shows_none() {
        let mut stored = account(ProviderKind::Offline, None);
        stored.refresh_token = None;
        assert!(format!("{:?}", stored).contains("refresh_token: None"));
    }

    #[test]
    fn test_credentials_with_otp() {
        let creds = Credentials::new("user".to_string(), "pass".to_string());
        assert!(creds.otp.is_none());

        let creds_with_otp = creds.with_otp("123456".to_string());
        assert_eq!(creds_with_otp.otp, Some("123456".to_string()));
    }

    #[rstest]
    #[case(ProviderKind::Offline, "offline")]
    #[case(ProviderKind::ManagedOauth, "managed-oauth")]
    #[case(ProviderKind::SelfHosted, "self-hosted")]
    fn test_provider_kind_names(#[case] kind: ProviderKind, #[case] expected: &str) {
        assert_eq!(kind.to_string(), expected);
        assert_eq!(expected.parse::<ProviderKind>(), Ok(kind));
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            format!("\"{}\"", expected)
        );
    }

    #[test]
    fn test_unknown_provider_name() {
        assert!("oauth".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_login_request_kind() {
        let offline = LoginRequest::Offline {
            display_name: "Steve".to_string(),
        };
        let password = LoginRequest::Password(Credentials::new("a".into(), "b".into()));

        assert_eq!(offline.kind(), ProviderKind::Offline);
        assert_eq!(LoginRequest::ManagedOauth.kind(), ProviderKind::ManagedOauth);
        assert_eq!(password.kind(), ProviderKind::SelfHosted);
    }

    #[test]
    fn test_instance_accepts_legacy_field_names() {
        let json = r#"{"id": "survival", "whitelistActive": true, "whitelist": ["Alice"]}"#;
        let instance: Instance = serde_json::from_str(json).unwrap();

        assert!(instance.whitelist_enabled);
        assert!(instance.whitelisted_names.contains("Alice"));
    }
}
