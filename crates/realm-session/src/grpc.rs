//! Authorization for tonic clients.
//!
//! [`AuthorizationLayer`] wraps the channel of a tonic client. Unary and streaming calls
//! are both sent as HTTP/2 requests through that channel, so each call fetches a valid
//! token from the [`Session`] and carries it in its `authorization` metadata.
//!
//! ```no_run
//! # async fn run(session: realm_session::Session) -> Result<(), Box<dyn std::error::Error>> {
//! use tonic::transport::Endpoint;
//! use tower::ServiceBuilder;
//!
//! let channel = Endpoint::from_static("http://service.example.com:50051")
//!     .connect()
//!     .await?;
//! let channel = ServiceBuilder::new()
//!     .layer(session.grpc_layer())
//!     .service(channel);
//! // let client = GreeterServiceClient::new(channel);
//! # Ok(())
//! # }
//! ```
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::header::AUTHORIZATION;
use tower_layer::Layer;
use tower_service::Service;

use crate::{provider::IdentityProvider, Session};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl<P> Session<P> {
    /// A tower layer that authorizes the calls of a tonic client with this session.
    #[must_use]
    pub fn grpc_layer(&self) -> AuthorizationLayer<P> {
        AuthorizationLayer::new(self.clone())
    }
}

/// Layer producing [`AuthorizedService`].
#[derive(Debug)]
pub struct AuthorizationLayer<P> {
    session: Session<P>,
}

impl<P> AuthorizationLayer<P> {
    #[must_use]
    pub fn new(session: Session<P>) -> Self {
        Self { session }
    }
}

impl<P> Clone for AuthorizationLayer<P> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<S, P> Layer<S> for AuthorizationLayer<P> {
    type Service = AuthorizedService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizedService {
            inner,
            session: self.session.clone(),
        }
    }
}

/// Inserts the `authorization` header into every request before passing it to the inner
/// service. Requests that already carry the header are passed on unchanged.
///
/// If no valid token can be obtained the request is not sent, and the call fails with an
/// `unauthenticated` [`tonic::Status`].
#[derive(Debug)]
pub struct AuthorizedService<S, P> {
    inner: S,
    session: Session<P>,
}

impl<S: Clone, P> Clone for AuthorizedService<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            session: self.session.clone(),
        }
    }
}

impl<S, P, B> Service<http::Request<B>> for AuthorizedService<S, P>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Send + 'static,
    P: IdentityProvider + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        // Only the service polled ready may be called.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let session = self.session.clone();

        Box::pin(async move {
            if !request.headers().contains_key(AUTHORIZATION) {
                let header = session.authorization_header().await.map_err(|e| {
                    tracing::debug!("Aborting call to `{}`: {e}", request.uri().path());
                    BoxError::from(tonic::Status::unauthenticated(e.to_string()))
                })?;
                request.headers_mut().insert(AUTHORIZATION, header);
            }
            inner.call(request).await.map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use http::HeaderValue;
    use tower::ServiceExt;
    use tracing_test::traced_test;

    use super::*;
    use crate::test_support::{session, MockProvider};

    async fn echo_authorization(
        request: http::Request<()>,
    ) -> Result<Option<HeaderValue>, Infallible> {
        Ok(request.headers().get(AUTHORIZATION).cloned())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_authorization_added() {
        let (session, _clock) = session(MockProvider::default());
        let service = session
            .grpc_layer()
            .layer(tower::service_fn(echo_authorization));

        let header = service.oneshot(http::Request::new(())).await.unwrap();

        assert_eq!(header.unwrap(), "Bearer access-1");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_calls_share_session_token() {
        let (session, _clock) = session(MockProvider::default());
        let service = session
            .grpc_layer()
            .layer(tower::service_fn(echo_authorization));

        let unary = service
            .clone()
            .oneshot(http::Request::new(()))
            .await
            .unwrap();
        let streaming = service.oneshot(http::Request::new(())).await.unwrap();

        assert_eq!(unary, streaming);
        assert_eq!(session.provider().logins(), 1);
        assert_eq!(session.provider().decodes(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_existing_authorization_not_replaced() {
        let (session, _clock) = session(MockProvider::default());
        let service = session
            .grpc_layer()
            .layer(tower::service_fn(echo_authorization));
        let mut request = http::Request::new(());
        request
            .headers_mut()
            .insert(AUTHORIZATION, "Bearer existing-token".parse().unwrap());

        let header = service.oneshot(request).await.unwrap();

        assert_eq!(header.unwrap(), "Bearer existing-token");
        assert_eq!(session.provider().logins(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_call_aborted_without_token() {
        let provider = MockProvider::default();
        provider.fail_login.store(true, Ordering::SeqCst);
        let (session, _clock) = session(provider);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = session
            .grpc_layer()
            .layer(tower::service_fn(move |request: http::Request<()>| {
                counter.fetch_add(1, Ordering::SeqCst);
                echo_authorization(request)
            }));

        let error = service
            .oneshot(http::Request::new(()))
            .await
            .unwrap_err();

        let status = error.downcast::<tonic::Status>().unwrap();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
