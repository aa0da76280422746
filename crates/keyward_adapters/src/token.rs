//! Wire format shared by the managed OAuth and self-hosted token endpoints.

use keyward_core::entities::TokenGrant;
use keyward_core::{Error, RejectionReason};
use reqwest::Response;
use serde::Deserialize;
use tracing::warn;

/// Which exchange a token request performs; decides how a rejected grant reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exchange {
    /// Credentials or an authorization code traded for the first tokens
    Login,
    Refresh,
}

/// Token endpoint payload. Variants are tried in order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TokenResponse {
    Granted {
        access_token: String,
        refresh_token: String,
        expires_in: u64,
        #[serde(default)]
        uuid: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Pending {
        status: String,
        reason: String,
    },
    Rejected {
        error: String,
        #[serde(default)]
        message: Option<String>,
    },
}

impl TokenResponse {
    /// Read and parse a response body. Non-success statuses are still parsed
    /// since providers report rejections with 4xx codes.
    pub(crate) async fn read(response: Response) -> Result<Self, Error> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read token response: {}", e)))?;

        serde_json::from_str(&text).map_err(|e| {
            Error::InvalidServerResponse(format!("unexpected token response ({}): {}", status, e))
        })
    }

    /// Require a complete grant; everything else becomes an error
    pub(crate) fn into_grant(self, exchange: Exchange) -> Result<TokenGrant, Error> {
        match self {
            TokenResponse::Granted {
                access_token,
                refresh_token,
                expires_in,
                uuid,
                name,
            } => {
                if access_token.is_empty() || refresh_token.is_empty() {
                    return Err(Error::InvalidServerResponse(
                        "token response carries empty tokens".to_string(),
                    ));
                }
                if expires_in == 0 {
                    return Err(Error::InvalidServerResponse(
                        "token response has no lifetime".to_string(),
                    ));
                }
                Ok(TokenGrant {
                    access_token,
                    refresh_token,
                    expires_in,
                    uuid,
                    name,
                })
            }
            TokenResponse::Pending { status, reason } => Err(Error::InvalidServerResponse(
                format!("unexpected pending response: {} ({})", status, reason),
            )),
            TokenResponse::Rejected { error, message } => {
                warn!(error = %error, ?exchange, "provider rejected token request");
                Err(Error::ProviderRejected(parse_rejection(
                    &error,
                    message.as_deref(),
                    exchange,
                )))
            }
        }
    }
}

/// Parse a provider error code and message into a typed reason. A rejected
/// grant means a dead refresh token on refresh, bad credentials or a bad
/// authorization code on login.
pub(crate) fn parse_rejection(
    error: &str,
    message: Option<&str>,
    exchange: Exchange,
) -> RejectionReason {
    let lower = format!("{} {}", error, message.unwrap_or("")).to_lowercase();

    if lower.contains("2fa") || lower.contains("otp") || lower.contains("second factor") {
        RejectionReason::InvalidSecondFactor
    } else if lower.contains("invalid_grant") || lower.contains("refresh") {
        match exchange {
            Exchange::Refresh => RejectionReason::InvalidRefreshToken,
            Exchange::Login => RejectionReason::InvalidCredentials,
        }
    } else if lower.contains("credentials") || lower.contains("password") {
        RejectionReason::InvalidCredentials
    } else if lower.contains("locked") || lower.contains("banned") || lower.contains("suspended")
    {
        RejectionReason::AccountLocked
    } else if lower.contains("rate") || lower.contains("too many") {
        RejectionReason::RateLimited
    } else {
        RejectionReason::Unknown(message.unwrap_or(error).to_string())
    }
}
