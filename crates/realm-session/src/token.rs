use std::time::Duration;

use http::HeaderValue;

use crate::error::{Error, Result};

/// Token set issued by the identity provider.
///
/// Lifetimes are relative to the moment the issuing request was sent. A
/// refresh lifetime of zero means the provider did not issue a usable refresh token.
#[derive(Clone, PartialEq, Eq, veil::Redact)]
pub struct Token {
    #[redact]
    pub access_token: String,
    pub expires_in: Duration,
    #[redact]
    pub refresh_token: Option<String>,
    pub refresh_expires_in: Duration,
    pub token_type: String,
}

impl Token {
    /// Create a bearer token without a refresh token.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            refresh_token: None,
            refresh_expires_in: Duration::ZERO,
            token_type: "bearer".to_string(),
        }
    }

    /// Attach a refresh token valid for `expires_in`.
    #[must_use]
    pub fn with_refresh_token(
        mut self,
        refresh_token: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self.refresh_expires_in = expires_in;
        self
    }

    /// Auth-scheme to send on the wire. `bearer` is normalized to `Bearer`
    /// in any casing, other token types are sent as issued.
    #[must_use]
    pub fn authorization_scheme(&self) -> &str {
        if self.token_type.is_empty() || self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            &self.token_type
        }
    }

    /// Value for the `Authorization` header: `<Scheme> <AccessToken>`.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidHeaderValue`] if the result is not valid ASCII.
    pub fn authorization_header(&self) -> Result<HeaderValue> {
        require_ascii(&self.access_token)?;
        require_ascii(&self.token_type)?;
        let mut header = HeaderValue::from_str(&format!(
            "{} {}",
            self.authorization_scheme(),
            self.access_token
        ))
        .map_err(|_e| Error::InvalidHeaderValue)?;
        header.set_sensitive(true);
        Ok(header)
    }
}

/// Helper function to ensure that a string is ASCII.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the string is not ASCII.
pub(crate) fn require_ascii(s: &str) -> Result<()> {
    if s.is_ascii() {
        Ok(())
    } else {
        Err(Error::InvalidHeaderValue)
    }
}

/// Whether `elapsed` still falls inside `lifetime` shortened by `threshold`.
/// Compared in whole seconds. A threshold larger than the lifetime leaves no window.
pub(crate) fn within_lifetime(elapsed: Duration, lifetime: Duration, threshold: Duration) -> bool {
    lifetime
        .checked_sub(threshold)
        .is_some_and(|window| elapsed.as_secs() <= window.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_scheme_is_capitalized() {
        let mut token = Token::bearer("abc", Duration::from_secs(60));
        assert_eq!(token.authorization_header().unwrap(), "Bearer abc");

        token.token_type = "BEARER".to_string();
        assert_eq!(token.authorization_header().unwrap(), "Bearer abc");
    }

    #[test]
    fn test_other_schemes_are_kept() {
        let mut token = Token::bearer("abc", Duration::from_secs(60));
        token.token_type = "DPoP".to_string();
        assert_eq!(token.authorization_header().unwrap(), "DPoP abc");
    }

    #[test]
    fn test_header_is_sensitive() {
        let token = Token::bearer("abc", Duration::from_secs(60));
        assert!(token.authorization_header().unwrap().is_sensitive());
    }

    #[test]
    fn test_non_ascii_token_is_rejected() {
        let token = Token::bearer("äbc", Duration::from_secs(60));
        assert!(matches!(
            token.authorization_header(),
            Err(Error::InvalidHeaderValue)
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = Token::bearer("super-secret", Duration::from_secs(60))
            .with_refresh_token("another-secret", Duration::from_secs(300));
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("another-secret"));
    }

    #[test]
    fn test_lifetime_window_boundaries() {
        let lifetime = Duration::from_secs(60);
        let threshold = Duration::from_secs(10);

        assert!(within_lifetime(Duration::from_secs(49), lifetime, threshold));
        assert!(within_lifetime(Duration::from_secs(50), lifetime, threshold));
        assert!(within_lifetime(Duration::from_millis(50_900), lifetime, threshold));
        assert!(!within_lifetime(Duration::from_secs(51), lifetime, threshold));
    }

    #[test]
    fn test_threshold_beyond_lifetime_leaves_no_window() {
        assert!(!within_lifetime(
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_secs(6)
        ));
        assert!(within_lifetime(
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_secs(5)
        ));
    }
}
