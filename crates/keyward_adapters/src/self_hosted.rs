use async_trait::async_trait;
use keyward_core::config::{AuthSettings, NetworkSettings};
use keyward_core::entities::{
    now_millis, Credentials, LoginOutcome, LoginRequest, NewAccount, ProviderKind, TokenGrant,
};
use keyward_core::ports::IdentityProvider;
use keyward_core::{Error, RejectionReason};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::network::{build_provider_client, transport_error};
use crate::token::{Exchange, TokenResponse};

const AUTHENTICATE_PATH: &str = "/api/auth/authenticate";
const REFRESH_PATH: &str = "/api/auth/refresh";

#[derive(Serialize)]
struct AuthenticateBody<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// Self-hosted authentication server reached under a configurable base URL
pub struct SelfHostedProvider {
    client: Client,
    network: NetworkSettings,
    base_url: String,
}

impl SelfHostedProvider {
    pub fn new(auth: &AuthSettings, network: &NetworkSettings) -> Result<Self, Error> {
        let base_url = auth
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .ok_or_else(|| {
                Error::Other("auth.base_url must be an http(s) URL for self-hosted login".to_string())
            })?;

        Ok(Self {
            client: build_provider_client(network)?,
            network: network.clone(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<TokenResponse, Error> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.network))?;

        TokenResponse::read(response).await
    }
}

fn validate_credentials(credentials: &Credentials) -> Result<(), Error> {
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(Error::Validation(
            "please fill in both username and password".to_string(),
        ));
    }
    if matches!(credentials.otp.as_deref(), Some(code) if code.trim().is_empty()) {
        return Err(Error::Validation(
            "please enter the second-factor code".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl IdentityProvider for SelfHostedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SelfHosted
    }

    #[instrument(skip(self, request))]
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, Error> {
        let LoginRequest::Password(credentials) = request else {
            return Err(Error::ProviderUnavailable(request.kind()));
        };
        validate_credentials(credentials)?;

        let body = AuthenticateBody {
            username: credentials.username.trim(),
            password: &credentials.password,
            code: credentials.otp.as_deref().map(str::trim),
        };

        debug!(with_code = body.code.is_some(), "sending login request");

        match self.post(AUTHENTICATE_PATH, &body).await? {
            TokenResponse::Pending { reason, .. } if reason == "2fa" => {
                if credentials.otp.is_some() {
                    // Code was sent and the server still wants one
                    return Err(Error::ProviderRejected(
                        RejectionReason::InvalidSecondFactor,
                    ));
                }
                info!("second factor required");
                Ok(LoginOutcome::SecondFactorRequired {
                    username: body.username.to_string(),
                })
            }
            response => {
                let grant = response.into_grant(Exchange::Login)?;
                let account = NewAccount::from_grant(
                    ProviderKind::SelfHosted,
                    grant,
                    Some(credentials.username.trim()),
                    now_millis(),
                )?;
                info!(name = %account.display_name, "self-hosted login successful");
                Ok(LoginOutcome::Authenticated(account))
            }
        }
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        self.post(REFRESH_PATH, &RefreshBody { refresh_token })
            .await?
            .into_grant(Exchange::Refresh)
    }
}
