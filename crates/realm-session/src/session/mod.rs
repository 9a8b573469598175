mod builder;

use std::{
    fmt,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

pub use builder::*;
use http::HeaderValue;

use crate::{
    client::RequestSkipper,
    clock::Clock,
    credentials::Credentials,
    error::{Error, Result},
    provider::{IdentityProvider, KeycloakClient},
    token::{within_lifetime, Token},
};

/// A client-credentials session against a realm of an identity provider.
///
/// The session caches the last issued [`Token`] and decides on every call to
/// [`Session::valid_token`] whether it can be reused, whether the refresh token
/// can be exchanged for a new one, or whether the client has to log in again.
/// Nothing happens in the background: tokens are only renewed when requested.
///
/// Access tokens are considered valid while the time elapsed since the request that
/// issued them is at most their lifetime minus the access token tolerance, and the identity
/// provider still reports them as active. Refresh tokens are considered valid while the
/// elapsed time is at most their lifetime minus the refresh token tolerance; they are not
/// checked with the provider.
///
/// Login and refresh calls are serialized per session. Concurrent callers that find a stale
/// token wait for the call in flight and reuse its result instead of issuing their own.
///
/// Uses `Arc` internally for cheap cloning.
pub struct Session<P = KeycloakClient> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    credentials: Credentials,
    provider: P,
    clock: Arc<dyn Clock>,
    access_token_tolerance: Duration,
    refresh_token_tolerance: Duration,
    enable_refresh: bool,
    skippers: Vec<Arc<dyn RequestSkipper>>,
    // Token and the instant its request was sent, always replaced together.
    issued: RwLock<Option<Arc<IssuedToken>>>,
    // Held while a token is requested from the provider.
    flight: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct IssuedToken {
    token: Token,
    requested_at: Instant,
}

impl<P> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credentials", &self.inner.credentials)
            .field("provider", &self.inner.provider)
            .field("access_token_tolerance", &self.inner.access_token_tolerance)
            .field("refresh_token_tolerance", &self.inner.refresh_token_tolerance)
            .field("enable_refresh", &self.inner.enable_refresh)
            .field("request_skippers", &self.inner.skippers.len())
            .field("token", &self.token())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a new [`SessionBuilder`] from the four mandatory identity fields.
    #[must_use]
    pub fn builder(
        client_id: &str,
        client_secret: &str,
        realm: &str,
        endpoint: url::Url,
    ) -> SessionBuilder {
        SessionBuilder::new(
            Credentials::builder()
                .client_id(client_id)
                .client_secret(client_secret)
                .realm(realm)
                .endpoint(endpoint)
                .build(),
        )
    }

    /// Create a new [`SessionBuilder`] from existing [`Credentials`].
    #[must_use]
    pub fn builder_from_credentials(credentials: Credentials) -> SessionBuilder {
        SessionBuilder::new(credentials)
    }
}

impl<P> Session<P> {
    /// The currently cached token, if any. The token is returned as is and may be expired.
    /// After a failed login the previously cached token remains in place.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        self.snapshot().map(|issued| issued.token.clone())
    }

    /// The identity provider client used by this session.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// The credentials this session authenticates with.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub(crate) fn request_skippers(&self) -> &[Arc<dyn RequestSkipper>] {
        &self.inner.skippers
    }

    fn snapshot(&self) -> Option<Arc<IssuedToken>> {
        // Unwrap RWLock to propagate poison (writer panicked)
        self.inner.issued.read().expect("Non-poisoned lock").clone()
    }

    fn store(&self, token: Token, requested_at: Instant) {
        let issued = Arc::new(IssuedToken {
            token,
            requested_at,
        });
        *self.inner.issued.write().expect("Non-poisoned lock") = Some(issued);
    }

    fn elapsed_since(&self, issued: &IssuedToken) -> Duration {
        self.inner
            .clock
            .now()
            .saturating_duration_since(issued.requested_at)
    }

    /// The refresh token of `issued`, if refreshing is enabled and it has not expired yet.
    fn usable_refresh_token<'a>(&self, issued: &'a IssuedToken) -> Option<&'a str> {
        if !self.inner.enable_refresh {
            return None;
        }
        let refresh_token = issued.token.refresh_token.as_deref()?;
        within_lifetime(
            self.elapsed_since(issued),
            issued.token.refresh_expires_in,
            self.inner.refresh_token_tolerance,
        )
        .then_some(refresh_token)
    }
}

impl<P: IdentityProvider> Session<P> {
    /// Returns a token whose access token can be used right now.
    ///
    /// Reuses the cached token while it is valid, otherwise refreshes it, and falls back
    /// to a new login if there is no usable refresh token or the refresh fails.
    ///
    /// # Errors
    /// Fails with [`Error::AuthenticationFailed`] if a login was required and failed.
    /// A failed refresh is never returned on its own.
    pub async fn valid_token(&self) -> Result<Token> {
        let observed = self.snapshot();
        if let Some(issued) = &observed {
            if self.is_access_token_valid(issued).await {
                tracing::trace!("Using cached access token");
                return Ok(issued.token.clone());
            }
        }

        let _flight = self.inner.flight.lock().await;

        let current = self.snapshot();
        if !same_issue(observed.as_ref(), current.as_ref()) {
            if let Some(issued) = &current {
                if self.is_access_token_valid(issued).await {
                    tracing::trace!("Using access token issued by a concurrent request");
                    return Ok(issued.token.clone());
                }
            }
        }

        if let Some(refresh_token) = current
            .as_deref()
            .and_then(|issued| self.usable_refresh_token(issued))
        {
            match self.refresh_with(refresh_token).await {
                Ok(token) => return Ok(token),
                Err(e) => tracing::warn!("{e}. Falling back to login."),
            }
        }

        self.authenticate().await
    }

    /// Log in again, regardless of the state of the cached token.
    ///
    /// # Errors
    /// Fails with [`Error::AuthenticationFailed`] if the login fails. The cached token is not
    /// touched in that case.
    pub async fn force_authenticate(&self) -> Result<()> {
        let _flight = self.inner.flight.lock().await;
        self.authenticate().await.map(|_| ())
    }

    /// Exchange the cached refresh token for a new token, regardless of the state of the
    /// cached token.
    ///
    /// # Errors
    /// - Fails with [`Error::MissingRefreshToken`] if no refresh token is cached.
    /// - Fails with [`Error::RefreshFailed`] if the refresh fails. The cached token is not
    ///   touched in that case.
    pub async fn force_refresh(&self) -> Result<()> {
        let _flight = self.inner.flight.lock().await;
        let current = self.snapshot();
        let refresh_token = current
            .as_deref()
            .and_then(|issued| issued.token.refresh_token.as_deref())
            .ok_or(Error::MissingRefreshToken)?;
        self.refresh_with(refresh_token).await.map(|_| ())
    }

    /// The `Authorization` header value for the current valid token.
    ///
    /// # Errors
    /// - Fails with [`Error::NoCredentialAvailable`] if no token was cached and the login failed.
    /// - Fails like [`Session::valid_token`] otherwise.
    /// - Fails with [`Error::InvalidHeaderValue`] if the token is not ASCII.
    pub async fn authorization_header(&self) -> Result<HeaderValue> {
        let had_token = self.snapshot().is_some();
        let token = self.valid_token().await.map_err(|e| {
            if had_token {
                e
            } else {
                Error::NoCredentialAvailable(Box::new(e))
            }
        })?;
        token.authorization_header()
    }

    async fn is_access_token_valid(&self, issued: &IssuedToken) -> bool {
        if issued.token.access_token.is_empty() {
            return false;
        }

        let elapsed = self.elapsed_since(issued);
        if !within_lifetime(
            elapsed,
            issued.token.expires_in,
            self.inner.access_token_tolerance,
        ) {
            tracing::trace!(
                "Access token issued {}s ago is past its lifetime of {}s minus a tolerance of {}s",
                elapsed.as_secs(),
                issued.token.expires_in.as_secs(),
                self.inner.access_token_tolerance.as_secs()
            );
            return false;
        }

        match self
            .inner
            .provider
            .decode_access_token(&issued.token.access_token, &self.inner.credentials)
            .await
        {
            Ok(info) => info.active,
            Err(e) => {
                tracing::warn!("Failed to decode access token: {e}");
                false
            }
        }
    }

    /// Must be called while holding the flight lock.
    async fn authenticate(&self) -> Result<Token> {
        // Stamped before the request so that its latency counts against the token lifetime.
        let requested_at = self.inner.clock.now();
        let token = self
            .inner
            .provider
            .login(&self.inner.credentials)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to log in client `{}`: {e}",
                    self.inner.credentials.client_id
                );
                Error::AuthenticationFailed(e)
            })?;

        tracing::debug!("Logged in client `{}`", self.inner.credentials.client_id);
        self.store(token.clone(), requested_at);
        Ok(token)
    }

    /// Must be called while holding the flight lock.
    async fn refresh_with(&self, refresh_token: &str) -> Result<Token> {
        let requested_at = self.inner.clock.now();
        let token = self
            .inner
            .provider
            .refresh(refresh_token, &self.inner.credentials)
            .await
            .map_err(Error::RefreshFailed)?;

        tracing::debug!("Refreshed token for client `{}`", self.inner.credentials.client_id);
        self.store(token.clone(), requested_at);
        Ok(token)
    }
}

fn same_issue(a: Option<&Arc<IssuedToken>>, b: Option<&Arc<IssuedToken>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
