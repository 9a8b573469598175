use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    clock::ManualClock,
    credentials::Credentials,
    provider::{IdentityProvider, ProviderError, TokenInfo},
    session::{Session, SessionBuilder},
    token::Token,
};

pub(crate) const ACCESS_LIFETIME: Duration = Duration::from_secs(60);
pub(crate) const REFRESH_LIFETIME: Duration = Duration::from_secs(300);

/// Provider issuing `access-{n}` / `refresh-{n}` tokens and counting every call.
#[derive(Debug, Default)]
pub(crate) struct MockProvider {
    issued: AtomicUsize,
    pub(crate) logins: AtomicUsize,
    pub(crate) refreshes: AtomicUsize,
    pub(crate) decodes: AtomicUsize,
    pub(crate) fail_login: AtomicBool,
    pub(crate) fail_refresh: AtomicBool,
    pub(crate) fail_decode: AtomicBool,
    pub(crate) without_refresh_token: AtomicBool,
    pub(crate) delay: Duration,
}

impl MockProvider {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub(crate) fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    async fn issue(&self) -> Token {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = Token::bearer(format!("access-{n}"), ACCESS_LIFETIME);
        if self.without_refresh_token.load(Ordering::SeqCst) {
            token
        } else {
            token.with_refresh_token(format!("refresh-{n}"), REFRESH_LIFETIME)
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockProvider {
    async fn login(&self, _credentials: &Credentials) -> Result<Token, ProviderError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(ProviderError::ServerResponse(
                "unauthorized_client".to_string(),
            ));
        }
        Ok(self.issue().await)
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        _credentials: &Credentials,
    ) -> Result<Token, ProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) || !refresh_token.starts_with("refresh-") {
            return Err(ProviderError::ServerResponse("invalid_grant".to_string()));
        }
        Ok(self.issue().await)
    }

    async fn decode_access_token(
        &self,
        access_token: &str,
        _credentials: &Credentials,
    ) -> Result<TokenInfo, ProviderError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if self.fail_decode.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("connection reset".to_string()));
        }
        Ok(TokenInfo {
            active: access_token.starts_with("access-"),
        })
    }
}

pub(crate) fn credentials() -> Credentials {
    Credentials::builder()
        .client_id("my-client")
        .client_secret("my-secret")
        .realm("my-realm")
        .endpoint("http://localhost:8080".parse().unwrap())
        .build()
}

pub(crate) fn builder(clock: &Arc<ManualClock>) -> SessionBuilder {
    Session::builder_from_credentials(credentials()).set_clock(clock.clone())
}

pub(crate) fn session(provider: MockProvider) -> (Session<MockProvider>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let session = builder(&clock).build_with_provider(provider).unwrap();
    (session, clock)
}
