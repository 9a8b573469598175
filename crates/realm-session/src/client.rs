use http::header::AUTHORIZATION;
use reqwest::IntoUrl;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};

use crate::{error::Result, provider::IdentityProvider, Session};

/// Decides whether an outgoing HTTP request is sent without credentials.
///
/// Implemented for every `Fn(&reqwest::Request) -> bool`.
pub trait RequestSkipper: Send + Sync {
    /// Returns `true` if `request` must not carry an `Authorization` header.
    fn skip(&self, request: &reqwest::Request) -> bool;
}

impl<F> RequestSkipper for F
where
    F: Fn(&reqwest::Request) -> bool + Send + Sync,
{
    fn skip(&self, request: &reqwest::Request) -> bool {
        self(request)
    }
}

impl<P: IdentityProvider> Session<P> {
    /// Add the `Authorization` header to `request`.
    ///
    /// Nothing happens if a request skipper matches the request or if the request already
    /// carries an `Authorization` header. Skipped requests do not trigger a token fetch.
    ///
    /// # Errors
    /// Fails if no valid token can be obtained, see [`Session::authorization_header`].
    pub async fn authorize_request(&self, request: &mut reqwest::Request) -> Result<()> {
        if self.request_skippers().iter().any(|s| s.skip(request)) {
            tracing::trace!("Sending request to `{}` without credentials", request.url());
            return Ok(());
        }
        if request.headers().contains_key(AUTHORIZATION) {
            return Ok(());
        }

        let header = self.authorization_header().await?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(())
    }
}

/// A `reqwest_middleware` middleware that authorizes outgoing requests with a [`Session`].
///
/// Requests that cannot be authorized fail before they are sent.
#[derive(Debug)]
pub struct AuthorizationMiddleware<P> {
    session: Session<P>,
}

impl<P> AuthorizationMiddleware<P> {
    #[must_use]
    pub fn new(session: Session<P>) -> Self {
        Self { session }
    }
}

impl<P> Clone for AuthorizationMiddleware<P> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AuthorizationMiddleware<P>
where
    P: IdentityProvider + 'static,
{
    async fn handle(
        &self,
        mut req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.session
            .authorize_request(&mut req)
            .await
            .map_err(reqwest_middleware::Error::middleware)?;
        next.run(req, extensions).await
    }
}

/// Wrapper around `reqwest::Client` that adds the authorization header of a [`Session`]
/// to every request it sends.
///
/// Designed to be a mostly drop-in replacement for `reqwest::Client`.
#[derive(Debug)]
pub struct HttpClient<P> {
    session: Session<P>,
    client: ClientWithMiddleware,
}

impl<P> Clone for HttpClient<P> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            client: self.client.clone(),
        }
    }
}

impl<P: IdentityProvider + 'static> HttpClient<P> {
    /// Creates a new `HttpClient` for the given `Session`.
    pub fn new(session: Session<P>) -> Self {
        let client = Self::wrap(&session, reqwest::Client::new());
        Self { session, client }
    }

    /// Set a custom `reqwest::Client`.
    #[must_use]
    pub fn set_client(mut self, client: reqwest::Client) -> Self {
        self.client = Self::wrap(&self.session, client);
        self
    }

    fn wrap(session: &Session<P>, client: reqwest::Client) -> ClientWithMiddleware {
        ClientBuilder::new(client)
            .with(AuthorizationMiddleware::new(session.clone()))
            .build()
    }

    /// The session used to authorize requests.
    pub fn session(&self) -> &Session<P> {
        &self.session
    }

    /// Obtain the current authorization header.
    ///
    /// # Errors
    /// Returns an error if the session fails to provide a token, typically because
    /// the login failed.
    pub async fn authorization_header(&self) -> Result<http::HeaderValue> {
        self.session.authorization_header().await
    }

    /// Start building a `Request`. The authorization header is added when it is sent.
    pub fn request<U: IntoUrl>(
        &self,
        method: reqwest::Method,
        url: U,
    ) -> reqwest_middleware::RequestBuilder {
        self.client.request(method, url)
    }

    /// Execute a `Request`, adding the authorization header if it is not already set.
    ///
    /// # Errors
    /// - Returns an error if the session fails to provide a token.
    /// - Returns an error if the request fails.
    pub async fn execute(
        &self,
        request: reqwest::Request,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.client.execute(request).await
    }

    /// Convenience method to make a `GET` request to a URL.
    pub fn get<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::GET, url)
    }

    /// Convenience method to make a `POST` request to a URL.
    pub fn post<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::POST, url)
    }

    /// Convenience method to make a `PUT` request to a URL.
    pub fn put<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::PUT, url)
    }

    /// Convenience method to make a `PATCH` request to a URL.
    pub fn patch<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::PATCH, url)
    }

    /// Convenience method to make a `DELETE` request to a URL.
    pub fn delete<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::DELETE, url)
    }

    /// Convenience method to make a `HEAD` request to a URL.
    pub fn head<U: IntoUrl>(&self, url: U) -> reqwest_middleware::RequestBuilder {
        self.request(reqwest::Method::HEAD, url)
    }
}
