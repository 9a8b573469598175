use std::{
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use super::{Inner, Session};
use crate::{
    client::RequestSkipper,
    clock::{Clock, SystemClock},
    credentials::Credentials,
    error::{Error, Result},
    provider::{IdentityProvider, KeycloakClient},
};

/// Builder for [`Session`].
///
/// The following configurations are available:
/// * `access_token_tolerance`: Treat access tokens as expired this long before they expire. Default is 0.
/// * `refresh_token_tolerance`: Treat refresh tokens as expired this long before they expire. Default is 0.
/// * `request_skippers`: Predicates over outgoing HTTP requests. Matching requests are sent without credentials.
/// * `scopes`: Scopes to request in the token. Empty by default.
/// * `enable_refresh`: Use refresh tokens instead of logging in again. Default is `true`.
/// * `http_client`, `max_retries`, `retry_interval`: Settings of the built-in [`KeycloakClient`].
///
/// All settings are fixed once the session is built.
pub struct SessionBuilder {
    credentials: Credentials,
    access_token_tolerance: Duration,
    refresh_token_tolerance: Duration,
    skippers: Vec<Arc<dyn RequestSkipper>>,
    enable_refresh: bool,
    http_client: Option<reqwest::Client>,
    max_retries: Option<u32>,
    retry_interval: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("credentials", &self.credentials)
            .field("access_token_tolerance", &self.access_token_tolerance)
            .field("refresh_token_tolerance", &self.refresh_token_tolerance)
            .field("request_skippers", &self.skippers.len())
            .field("enable_refresh", &self.enable_refresh)
            .field("http_client", &self.http_client)
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .field("clock", &self.clock)
            .finish()
    }
}

impl SessionBuilder {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            access_token_tolerance: Duration::ZERO,
            refresh_token_tolerance: Duration::ZERO,
            skippers: Vec::new(),
            enable_refresh: true,
            http_client: None,
            max_retries: None,
            retry_interval: None,
            clock: None,
        }
    }

    /// Treat access tokens as expired `tolerance` before they actually expire.
    /// Avoids sending tokens that expire while the request is in flight.
    #[must_use]
    pub fn access_token_tolerance(mut self, tolerance: Duration) -> Self {
        self.access_token_tolerance = tolerance;
        self
    }

    /// Treat refresh tokens as expired `tolerance` before they actually expire.
    #[must_use]
    pub fn refresh_token_tolerance(mut self, tolerance: Duration) -> Self {
        self.refresh_token_tolerance = tolerance;
        self
    }

    /// Add a predicate deciding whether an outgoing HTTP request is sent without credentials.
    /// Predicates are evaluated in the order they were added.
    ///
    /// ```
    /// # use realm_session::Session;
    /// let builder = Session::builder(
    ///     "my-client",
    ///     "my-secret",
    ///     "my-realm",
    ///     "https://keycloak.example.com".parse().unwrap(),
    /// )
    /// .add_request_skipper(|request: &reqwest::Request| request.url().path() == "/health");
    /// ```
    #[must_use]
    pub fn add_request_skipper<S>(mut self, skipper: S) -> Self
    where
        S: RequestSkipper + 'static,
    {
        self.skippers.push(Arc::new(skipper));
        self
    }

    /// Never use refresh tokens. Expired access tokens are renewed by logging in again.
    #[must_use]
    pub fn disable_refresh(mut self) -> Self {
        self.enable_refresh = false;
        self
    }

    /// Add a scope to the token request.
    #[must_use]
    pub fn add_scope(mut self, scope: &str) -> Self {
        self.credentials.scopes.push(scope.to_string());
        self
    }

    /// Add multiple scopes to the token request.
    #[must_use]
    pub fn add_scopes<I>(mut self, scopes: &[I]) -> Self
    where
        I: AsRef<str>,
    {
        self.credentials
            .scopes
            .extend(scopes.iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Optionally specify the `reqwest::Client` the built-in [`KeycloakClient`] uses.
    /// When setting a custom client, please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    ///
    /// Use this method if you want to set custom headers or timeouts.
    #[must_use]
    pub fn set_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Optionally set the maximum number of retries of the built-in [`KeycloakClient`].
    /// The default is 3.
    #[must_use]
    pub fn set_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Optionally set the retry interval of the built-in [`KeycloakClient`].
    /// The default is 10ms.
    #[must_use]
    pub fn set_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = Some(retry_interval);
        self
    }

    /// Replace the system clock used to track token lifetimes.
    #[must_use]
    pub fn set_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build a [`Session`] using the built-in [`KeycloakClient`].
    /// No token is requested until one is needed.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the credentials are invalid or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Session<KeycloakClient>> {
        self.credentials.validate()?;

        let mut provider = match &self.http_client {
            Some(client) => KeycloakClient::with_http_client(client.clone()),
            None => KeycloakClient::new()?,
        };
        if let Some(max_retries) = self.max_retries {
            provider = provider.set_max_retries(max_retries);
        }
        if let Some(retry_interval) = self.retry_interval {
            provider = provider.set_retry_interval(retry_interval);
        }

        Ok(self.finish(provider))
    }

    /// Build a [`Session`] that talks to the identity provider through `provider`.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the credentials are invalid, or if settings of
    /// the built-in client (`http_client`, `max_retries`, `retry_interval`) were configured.
    pub fn build_with_provider<P: IdentityProvider>(self, provider: P) -> Result<Session<P>> {
        self.credentials.validate()?;

        if self.http_client.is_some() || self.max_retries.is_some() || self.retry_interval.is_some()
        {
            return Err(Error::configuration(
                "`set_http_client`, `set_max_retries` and `set_retry_interval` cannot be combined with a custom identity provider",
            ));
        }

        Ok(self.finish(provider))
    }

    fn finish<P>(self, provider: P) -> Session<P> {
        tracing::debug!(
            "Creating session for client `{}` in realm `{}`",
            self.credentials.client_id,
            self.credentials.realm
        );

        Session {
            inner: Arc::new(Inner {
                credentials: self.credentials,
                provider,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                access_token_tolerance: self.access_token_tolerance,
                refresh_token_tolerance: self.refresh_token_tolerance,
                enable_refresh: self.enable_refresh,
                skippers: self.skippers,
                issued: RwLock::new(None),
                flight: tokio::sync::Mutex::new(()),
            }),
        }
    }
}
