use std::collections::BTreeMap;

use async_trait::async_trait;
use keyward_core::entities::{
    LoginOutcome, LoginRequest, NewAccount, ProviderKind, TokenGrant, META_UUID,
};
use keyward_core::ports::IdentityProvider;
use keyward_core::{Error, RejectionReason};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};

const MIN_NAME_LEN: usize = 3;

/// Name-only accounts that never talk to a server
#[derive(Debug, Default)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for OfflineProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Offline
    }

    #[instrument(skip(self, request))]
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, Error> {
        let LoginRequest::Offline { display_name } = request else {
            return Err(Error::ProviderUnavailable(request.kind()));
        };

        validate_display_name(display_name)?;

        let id = offline_id(display_name);
        debug!(name = %display_name, "created offline account");

        let mut provider_meta = BTreeMap::new();
        provider_meta.insert(META_UUID.to_string(), id.clone());

        Ok(LoginOutcome::Authenticated(NewAccount {
            display_name: display_name.clone(),
            provider: ProviderKind::Offline,
            access_token: id,
            refresh_token: None,
            expires_at: None,
            provider_meta,
        }))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, Error> {
        Err(Error::ProviderRejected(RejectionReason::Unknown(
            "offline accounts have nothing to refresh".to_string(),
        )))
    }
}

/// Offline names need at least three characters and no whitespace
pub fn validate_display_name(name: &str) -> Result<(), Error> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(Error::Validation(format!(
            "name must be at least {} characters long",
            MIN_NAME_LEN
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::Validation(
            "name must not contain spaces".to_string(),
        ));
    }
    Ok(())
}

/// Stable identifier derived from the player name
fn offline_id(name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("OfflinePlayer:{}", name).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
