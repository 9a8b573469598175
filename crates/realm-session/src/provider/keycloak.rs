use std::{future::Future, time::Duration};

use oauth2::{
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
    AccessToken, ClientId, ClientSecret, EndpointNotSet, EndpointSet, ErrorResponse,
    ExtraTokenFields, IntrospectionUrl, RefreshToken, RequestTokenError, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenIntrospectionResponse, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::{IdentityProvider, ProviderError, TokenInfo};
use crate::{
    credentials::Credentials,
    error::{Error, Result},
    token::Token,
};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

impl<TE: ErrorResponse> From<RequestTokenError<oauth2::HttpClientError<reqwest::Error>, TE>>
    for ProviderError
{
    fn from(value: RequestTokenError<oauth2::HttpClientError<reqwest::Error>, TE>) -> Self {
        match value {
            RequestTokenError::Request(e) => ProviderError::Request(e.to_string()),
            RequestTokenError::Parse(e, _) => ProviderError::Parse(e.to_string()),
            RequestTokenError::ServerResponse(e) => ProviderError::ServerResponse(e.to_string()),
            // Non-success status without an error body.
            RequestTokenError::Other(e) => ProviderError::ServerResponse(e),
        }
    }
}

/// Keycloak reports the lifetime of the refresh token next to the standard fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeycloakTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_expires_in: Option<u64>,
}

impl ExtraTokenFields for KeycloakTokenFields {}

type KeycloakTokenResponse = StandardTokenResponse<KeycloakTokenFields, BasicTokenType>;

type OAuth2Client = oauth2::Client<
    BasicErrorResponse,
    KeycloakTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet, // Introspection decodes access tokens
    EndpointNotSet,
    EndpointSet, // TokenUrl is required
>;

/// [`IdentityProvider`] talking to the OpenID Connect endpoints of a Keycloak realm.
///
/// Tokens are requested from `{endpoint}/realms/{realm}/protocol/openid-connect/token`,
/// access tokens are decoded through the token introspection endpoint of the same realm.
/// The client authenticates with HTTP Basic auth.
///
/// Requests that fail in transport are retried; responses from the server, including errors,
/// are not.
#[derive(Debug, Clone)]
pub struct KeycloakClient {
    http_client: reqwest::Client,
    max_retries: u32,
    retry_interval: Duration,
}

impl KeycloakClient {
    /// Create a new [`KeycloakClient`] with a default `reqwest::Client` that does not follow redirects.
    /// Initializes with 3 retries and a retry interval of 10ms.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be initialized, e.g. because no TLS backend is available.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_http_client(http_client))
    }

    /// Use a custom `reqwest::Client` for requests to the identity provider.
    /// Please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn with_http_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the maximum number of retries for a failed request.
    #[must_use]
    pub fn set_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the interval between consecutive retries.
    #[must_use]
    pub fn set_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut counter = 0;

        loop {
            counter += 1;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e @ ProviderError::Request(_)) if counter <= self.max_retries => {
                    tracing::debug!(
                        "Failed to {operation}: {e}. Retrying in {}ms",
                        self.retry_interval.as_millis()
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to {operation} after {counter} attempt(s): {e}");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for KeycloakClient {
    #[tracing::instrument(
        skip_all,
        fields(realm = %credentials.realm, client_id = %credentials.client_id)
    )]
    async fn login(&self, credentials: &Credentials) -> std::result::Result<Token, ProviderError> {
        let client = &oauth2_client(credentials)?;
        let http_client = &self.http_client;

        let response = self
            .with_retries("fetch token", move || async move {
                let mut request = client.exchange_client_credentials();
                for scope in &credentials.scopes {
                    request = request.add_scope(Scope::new(scope.clone()));
                }
                request
                    .request_async(http_client)
                    .await
                    .map_err(ProviderError::from)
            })
            .await?;

        tracing::debug!(
            "Successfully fetched token for client `{}`",
            credentials.client_id
        );
        token_from_response(&response)
    }

    #[tracing::instrument(
        skip_all,
        fields(realm = %credentials.realm, client_id = %credentials.client_id)
    )]
    async fn refresh(
        &self,
        refresh_token: &str,
        credentials: &Credentials,
    ) -> std::result::Result<Token, ProviderError> {
        let client = &oauth2_client(credentials)?;
        let http_client = &self.http_client;
        let refresh_token = &RefreshToken::new(refresh_token.to_string());

        let response = self
            .with_retries("refresh token", move || async move {
                client
                    .exchange_refresh_token(refresh_token)
                    .request_async(http_client)
                    .await
                    .map_err(ProviderError::from)
            })
            .await?;

        tracing::debug!(
            "Successfully refreshed token for client `{}`",
            credentials.client_id
        );
        token_from_response(&response)
    }

    #[tracing::instrument(
        skip_all,
        fields(realm = %credentials.realm, client_id = %credentials.client_id)
    )]
    async fn decode_access_token(
        &self,
        access_token: &str,
        credentials: &Credentials,
    ) -> std::result::Result<TokenInfo, ProviderError> {
        let client = &oauth2_client(credentials)?;
        let http_client = &self.http_client;
        let access_token = &AccessToken::new(access_token.to_string());

        let response = self
            .with_retries("introspect token", move || async move {
                client
                    .introspect(access_token)
                    .request_async(http_client)
                    .await
                    .map_err(ProviderError::from)
            })
            .await?;

        Ok(TokenInfo {
            active: response.active(),
        })
    }
}

fn oauth2_client(credentials: &Credentials) -> std::result::Result<OAuth2Client, ProviderError> {
    let token_url = openid_connect_url(credentials, &["token"])?;
    let introspection_url = openid_connect_url(credentials, &["token", "introspect"])?;

    Ok(oauth2::Client::new(ClientId::new(credentials.client_id.clone()))
        .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
        .set_token_uri(TokenUrl::from_url(token_url))
        .set_introspection_url(IntrospectionUrl::from_url(introspection_url)))
}

fn openid_connect_url(
    credentials: &Credentials,
    path: &[&str],
) -> std::result::Result<url::Url, ProviderError> {
    let mut url = credentials.endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| {
            ProviderError::Request(format!(
                "endpoint `{}` cannot be a base URL",
                credentials.endpoint
            ))
        })?
        .pop_if_empty()
        .extend([
            "realms",
            credentials.realm.as_str(),
            "protocol",
            "openid-connect",
        ])
        .extend(path);
    Ok(url)
}

fn token_from_response(
    response: &KeycloakTokenResponse,
) -> std::result::Result<Token, ProviderError> {
    let access_token = response.access_token().secret();
    if access_token.is_empty() {
        return Err(ProviderError::InvalidToken(
            "response contains an empty access token".to_string(),
        ));
    }

    let refresh_token = response.refresh_token().map(|t| t.secret().clone());
    // Without a declared lifetime the refresh token is used until the provider rejects it.
    let refresh_expires_in = match (&refresh_token, response.extra_fields().refresh_expires_in) {
        (None, _) => Duration::ZERO,
        (Some(_), Some(secs)) => Duration::from_secs(secs),
        (Some(_), None) => Duration::MAX,
    };

    Ok(Token {
        access_token: access_token.clone(),
        expires_in: response.expires_in().unwrap_or(Duration::MAX),
        refresh_token,
        refresh_expires_in,
        token_type: response.token_type().as_ref().to_string(),
    })
}
