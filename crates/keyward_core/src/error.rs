use std::fmt;

use thiserror::Error;

use crate::entities::{InstanceId, ProviderKind};

/// Why a provider turned a login or refresh down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidCredentials,
    InvalidSecondFactor,
    InvalidRefreshToken,
    AccountLocked,
    RateLimited,
    Unknown(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid username or password"),
            Self::InvalidSecondFactor => write!(f, "invalid second-factor code"),
            Self::InvalidRefreshToken => write!(f, "refresh token expired or revoked"),
            Self::AccountLocked => write!(f, "account is locked"),
            Self::RateLimited => write!(f, "too many login attempts"),
            Self::Unknown(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("provider rejected the request: {0}")]
    ProviderRejected(RejectionReason),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider did not answer within {0} seconds")]
    Timeout(u64),

    #[error("invalid response from server: {0}")]
    InvalidServerResponse(String),

    #[error("provider '{0}' is not available")]
    ProviderUnavailable(ProviderKind),

    #[error("a login is already in progress")]
    LoginInProgress,

    #[error("no active account")]
    NoActiveAccount,

    #[error("no instance selected")]
    NoInstanceSelected,

    #[error("instance '{0}' not found")]
    InstanceNotFound(InstanceId),

    #[error("'{display_name}' is not whitelisted on instance '{instance}'")]
    AccessDenied {
        instance: InstanceId,
        display_name: String,
    },

    #[error("account storage error: {0}")]
    Store(String),

    #[error("credential storage error: {0}")]
    CredentialStorage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient failures the user may simply try again after
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
