//! Request authorization for the protected routes.

use std::collections::HashSet;

use axum::http::{header, HeaderMap};

use crate::config::AuthConfig;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Who a request was authorized as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Producer or tool presenting the shared secret.
    ApiKey,
    /// Browser session.
    Session,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,
    #[error("invalid credentials")]
    Invalid,
}

/// Decides whether a request may use a protected route.
pub trait Authenticator: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// API key header or session cookie, both checked against configured values.
pub struct SharedSecretAuth {
    api_key: Option<String>,
    session_cookie: String,
    session_tokens: HashSet<String>,
}

impl SharedSecretAuth {
    pub fn new(config: &AuthConfig) -> Self {
        if config.api_key.is_none() && config.session_tokens.is_empty() {
            log::warn!("No API key or session tokens configured; protected routes will reject every request");
        }
        Self {
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            session_cookie: config.session_cookie.clone(),
            session_tokens: config.session_tokens.iter().cloned().collect(),
        }
    }

    fn cookie<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.session_cookie)
            .map(|(_, value)| value)
    }
}

impl Authenticator for SharedSecretAuth {
    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let presented_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if let Some(key) = presented_key {
            if self.api_key.as_deref() == Some(key) {
                return Ok(Principal::ApiKey);
            }
        }

        match self.cookie(headers) {
            Some(token) if self.session_tokens.contains(token) => Ok(Principal::Session),
            Some(_) => Err(AuthError::Invalid),
            None if presented_key.is_some() => Err(AuthError::Invalid),
            None => Err(AuthError::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> SharedSecretAuth {
        SharedSecretAuth::new(&AuthConfig {
            api_key: Some("secret".into()),
            session_cookie: "logcast_session".into(),
            session_tokens: vec!["tok-1".into()],
        })
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_api_key() {
        let auth = auth();
        assert_eq!(auth.authorize(&headers(&[("x-api-key", "secret")])), Ok(Principal::ApiKey));
        assert_eq!(auth.authorize(&headers(&[("x-api-key", "nope")])), Err(AuthError::Invalid));
    }

    #[test]
    fn test_session_cookie() {
        let auth = auth();
        let ok = headers(&[("cookie", "theme=dark; logcast_session=tok-1")]);
        assert_eq!(auth.authorize(&ok), Ok(Principal::Session));
        let bad = headers(&[("cookie", "logcast_session=forged")]);
        assert_eq!(auth.authorize(&bad), Err(AuthError::Invalid));
    }

    #[test]
    fn test_missing_credentials() {
        assert_eq!(auth().authorize(&HeaderMap::new()), Err(AuthError::Missing));
        assert_eq!(
            auth().authorize(&headers(&[("cookie", "theme=dark")])),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn test_unconfigured_key_never_matches_empty_header() {
        let auth = SharedSecretAuth::new(&AuthConfig {
            api_key: Some(String::new()),
            ..AuthConfig::default()
        });
        assert_eq!(auth.authorize(&headers(&[("x-api-key", "")])), Err(AuthError::Invalid));
    }
}
