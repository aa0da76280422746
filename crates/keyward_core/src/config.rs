use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entities::ProviderKind;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://login.live.com/oauth20_authorize.srf";
pub const DEFAULT_TOKEN_URL: &str = "https://login.live.com/oauth20_token.srf";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub instances: InstanceSettings,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthSettings {
    /// Primary identity backend offered on the login screen
    pub backend: ProviderKind,
    /// OAuth client registered with the managed identity service
    pub client_id: Option<String>,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    /// Local port the loopback broker listens on for the OAuth redirect
    pub redirect_port: u16,
    /// How long to wait for the user to finish the browser login
    pub login_wait_secs: u64,
    /// Base URL of the self-hosted authentication server
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Upper bound for a whole silent refresh
    pub refresh_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct InstanceSettings {
    /// JSON file holding the ordered instance list
    pub path: Option<PathBuf>,
}

impl AuthSettings {
    /// Providers the login screen offers for the configured backend.
    /// Managed OAuth deployments also allow offline play.
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        match self.backend {
            ProviderKind::Offline => vec![ProviderKind::Offline],
            ProviderKind::ManagedOauth => vec![ProviderKind::ManagedOauth, ProviderKind::Offline],
            ProviderKind::SelfHosted => vec![ProviderKind::SelfHosted],
        }
    }

    pub fn authorize_url(&self) -> &str {
        self.authorize_url.as_deref().unwrap_or(DEFAULT_AUTHORIZE_URL)
    }

    pub fn token_url(&self) -> &str {
        self.token_url.as_deref().unwrap_or(DEFAULT_TOKEN_URL)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs)
    }
}

impl NetworkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            network: NetworkSettings::default(),
            instances: InstanceSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            backend: ProviderKind::default(),
            client_id: None,
            authorize_url: None,
            token_url: None,
            redirect_port: 48123,
            login_wait_secs: 300,
            base_url: None,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            refresh_timeout_secs: 15,
        }
    }
}
