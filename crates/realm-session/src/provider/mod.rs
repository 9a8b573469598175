mod keycloak;

use std::fmt::Debug;

pub use keycloak::*;

use crate::{credentials::Credentials, token::Token};

/// Error reported by an [`IdentityProvider`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request to identity provider failed: {0}")]
    Request(String),
    #[error("Identity provider rejected the request: {0}")]
    ServerResponse(String),
    #[error("Failed to parse identity provider response: {0}")]
    Parse(String),
    #[error("Identity provider issued an unusable token: {0}")]
    InvalidToken(String),
}

/// Result of decoding an access token at the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    /// The token is structurally valid and not expired.
    pub active: bool,
}

/// The calls a [`Session`](crate::Session) makes against the identity provider.
///
/// Implementations are shared between all clones of a session and called concurrently.
#[async_trait::async_trait]
pub trait IdentityProvider: Debug + Send + Sync {
    /// Obtain a new token set using the client-credentials grant.
    async fn login(&self, credentials: &Credentials) -> Result<Token, ProviderError>;

    /// Exchange `refresh_token` for a new token set.
    async fn refresh(
        &self,
        refresh_token: &str,
        credentials: &Credentials,
    ) -> Result<Token, ProviderError>;

    /// Ask the provider whether `access_token` is still valid.
    async fn decode_access_token(
        &self,
        access_token: &str,
        credentials: &Credentials,
    ) -> Result<TokenInfo, ProviderError>;
}
