use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// Client identity used for every call against the identity provider.
///
/// ```
/// use realm_session::Credentials;
///
/// let credentials = Credentials::builder()
///     .client_id("my-client")
///     .client_secret("my-secret")
///     .realm("my-realm")
///     .endpoint("https://keycloak.example.com".parse().unwrap())
///     .build();
/// assert!(credentials.scopes.is_empty());
/// ```
#[derive(Clone, PartialEq, Eq, veil::Redact, TypedBuilder)]
pub struct Credentials {
    #[builder(setter(into))]
    pub client_id: String,
    #[redact]
    #[builder(setter(into))]
    pub client_secret: String,
    #[builder(setter(into))]
    pub realm: String,
    /// Base URL of the identity provider, e.g. `https://keycloak.example.com/`.
    pub endpoint: url::Url,
    #[builder(default)]
    pub scopes: Vec<String>,
}

impl Credentials {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::configuration("client id must not be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(Error::configuration("client secret must not be empty"));
        }
        if self.realm.is_empty() {
            return Err(Error::configuration("realm must not be empty"));
        }
        if !matches!(self.endpoint.scheme(), "http" | "https") || self.endpoint.cannot_be_a_base() {
            return Err(Error::configuration(format!(
                "endpoint `{}` is not an http(s) base URL",
                self.endpoint
            )));
        }
        if let Some(scope) = self
            .scopes
            .iter()
            .find(|s| s.is_empty() || s.contains(char::is_whitespace))
        {
            return Err(Error::configuration(format!(
                "scope `{scope}` must be non-empty and must not contain whitespace"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::builder()
            .client_id("my-client")
            .client_secret("my-secret")
            .realm("my-realm")
            .endpoint("http://localhost:8080".parse().unwrap())
            .build()
    }

    #[test]
    fn test_valid_credentials() {
        assert!(credentials().validate().is_ok());
    }

    #[test]
    fn test_empty_realm_is_rejected() {
        let mut credentials = credentials();
        credentials.realm = String::new();
        assert!(matches!(
            credentials.validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_non_http_endpoint_is_rejected() {
        let mut credentials = credentials();
        credentials.endpoint = "mailto:admin@example.com".parse().unwrap();
        assert!(matches!(
            credentials.validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_scope_with_whitespace_is_rejected() {
        let mut credentials = credentials();
        credentials.scopes = vec!["openid profile".to_string()];
        assert!(matches!(
            credentials.validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", credentials()).contains("my-secret"));
    }
}
