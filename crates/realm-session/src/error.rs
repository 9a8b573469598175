use crate::provider::ProviderError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Login to identity provider failed: {0}")]
    AuthenticationFailed(#[source] ProviderError),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[source] ProviderError),
    #[error("No refresh token available")]
    MissingRefreshToken,
    #[error("No credential available: {0}")]
    NoCredentialAvailable(#[source] Box<Error>),
    #[error("Invalid session configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}
