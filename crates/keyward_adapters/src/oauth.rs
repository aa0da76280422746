use std::sync::Arc;

use async_trait::async_trait;
use keyward_core::config::{AuthSettings, NetworkSettings};
use keyward_core::entities::{
    now_millis, BrokerOutcome, LoginOutcome, LoginRequest, NewAccount, ProviderKind, TokenGrant,
};
use keyward_core::ports::{AuthorizationBroker, IdentityProvider};
use keyward_core::Error;
use reqwest::{Client, Url};
use tracing::{debug, info, instrument};

use crate::network::{build_provider_client, transport_error};
use crate::token::{Exchange, TokenResponse};

const SCOPE: &str = "XboxLive.signin offline_access";

/// Managed OAuth identity service. The browser half of the login runs in an
/// `AuthorizationBroker`; this provider only talks to the token endpoint.
pub struct ManagedOAuthProvider {
    client: Client,
    network: NetworkSettings,
    client_id: String,
    authorize_url: String,
    token_url: String,
    broker: Arc<dyn AuthorizationBroker>,
}

impl ManagedOAuthProvider {
    pub fn new(
        auth: &AuthSettings,
        network: &NetworkSettings,
        broker: Arc<dyn AuthorizationBroker>,
    ) -> Result<Self, Error> {
        let client_id = auth
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Other("auth.client_id is required for managed OAuth".to_string()))?;

        Ok(Self {
            client: build_provider_client(network)?,
            network: network.clone(),
            client_id,
            authorize_url: auth.authorize_url().to_string(),
            token_url: auth.token_url().to_string(),
            broker,
        })
    }

    fn build_authorize_url(&self, redirect_uri: &str) -> Result<String, Error> {
        Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPE),
                ("prompt", "select_account"),
            ],
        )
        .map(|url| url.to_string())
        .map_err(|e| Error::Other(format!("invalid authorize URL: {}", e)))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.network))?;

        TokenResponse::read(response).await
    }
}

#[async_trait]
impl IdentityProvider for ManagedOAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ManagedOauth
    }

    #[instrument(skip(self, request))]
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, Error> {
        if !matches!(request, LoginRequest::ManagedOauth) {
            return Err(Error::ProviderUnavailable(request.kind()));
        }

        let redirect_uri = self.broker.redirect_uri();
        let authorize_url = self.build_authorize_url(&redirect_uri)?;

        let code = match self.broker.authorize(&authorize_url).await? {
            BrokerOutcome::Code(code) => code,
            BrokerOutcome::Cancelled => return Ok(LoginOutcome::Cancelled),
        };

        debug!("exchanging authorization code");

        let grant = self
            .request_token(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", SCOPE),
            ])
            .await?
            .into_grant(Exchange::Login)?;

        let account = NewAccount::from_grant(ProviderKind::ManagedOauth, grant, None, now_millis())?;
        info!(name = %account.display_name, "managed OAuth login successful");
        Ok(LoginOutcome::Authenticated(account))
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        self.request_token(&[
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", SCOPE),
        ])
        .await?
        .into_grant(Exchange::Refresh)
    }
}
