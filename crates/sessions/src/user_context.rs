//! UserContext extraction from inbound `Authorization: Bearer <JWT>` headers
//! (§4.7). Transport-agnostic: the gateway's axum extractor calls these
//! against the raw header value and maps [`AuthError`] to HTTP status codes.

use std::fmt;
use std::sync::Arc;

use ak_domain::session::UserContext;

use crate::auth::{JwtHandler, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token, or it failed verification — maps to 401.
    Unauthenticated,
    /// Authenticated, but the requested operation needs a provider API key
    /// the user hasn't configured — maps to 403.
    ProviderKeyRequired,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "not authenticated"),
            Self::ProviderKeyRequired => write!(f, "provider API key required"),
        }
    }
}

impl std::error::Error for AuthError {}

fn bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header?.strip_prefix("Bearer ")
}

/// Resolves `Authorization` headers to [`UserContext`]s against a shared
/// [`JwtHandler`]/[`TokenStore`] pair.
pub struct UserContextExtractor {
    jwt: Arc<JwtHandler>,
    tokens: Arc<TokenStore>,
}

impl UserContextExtractor {
    pub fn new(jwt: Arc<JwtHandler>, tokens: Arc<TokenStore>) -> Self {
        Self { jwt, tokens }
    }

    /// Soft check: `None` on any failure, never errors.
    pub fn get_optional_user(&self, auth_header: Option<&str>) -> Option<UserContext> {
        let token = bearer_token(auth_header)?;
        let payload = self.jwt.verify_token(token)?;
        let tokens = self.tokens.get_tokens(&payload.user_id)?;
        Some(UserContext {
            user_id: payload.user_id,
            hub_token: tokens.hub_token,
            username: tokens.username,
            display_name: tokens.display_name,
            picture: tokens.picture,
            provider_api_key: tokens.provider_api_key,
        })
    }

    /// Hard check: `Err(AuthError::Unauthenticated)` when missing/invalid.
    pub fn require_auth(&self, auth_header: Option<&str>) -> Result<UserContext, AuthError> {
        self.get_optional_user(auth_header).ok_or(AuthError::Unauthenticated)
    }

    /// Hard check plus the extra-provider-key guard.
    pub fn require_provider_key(&self, auth_header: Option<&str>) -> Result<UserContext, AuthError> {
        let user = self.require_auth(auth_header)?;
        if !user.has_provider_key() {
            return Err(AuthError::ProviderKeyRequired);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::config::AuthConfig;

    fn extractor() -> (UserContextExtractor, Arc<JwtHandler>) {
        let config = AuthConfig { jwt_secret: Some("s".into()), token_encryption_key: None, token_lifetime_hours: 8 };
        let jwt = Arc::new(JwtHandler::from_config(&config));
        let tokens = Arc::new(TokenStore::from_config(&config).unwrap());
        (UserContextExtractor::new(jwt.clone(), tokens), jwt)
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let (ex, _jwt) = extractor();
        assert_eq!(ex.require_auth(None).unwrap_err(), AuthError::Unauthenticated);
        assert!(ex.get_optional_user(None).is_none());
    }

    #[test]
    fn valid_token_without_stored_tokens_is_unauthenticated() {
        let (ex, jwt) = extractor();
        let token = jwt.create_token("alice").unwrap();
        let header = format!("Bearer {token}");
        assert!(ex.get_optional_user(Some(&header)).is_none());
    }

    #[test]
    fn require_provider_key_rejects_user_without_one() {
        let config = AuthConfig { jwt_secret: Some("s".into()), token_encryption_key: None, token_lifetime_hours: 8 };
        let jwt = Arc::new(JwtHandler::from_config(&config));
        let tokens = Arc::new(TokenStore::from_config(&config).unwrap());
        tokens.store_tokens("alice", "hub-tok", "alice", None, None, None).unwrap();
        let ex = UserContextExtractor::new(jwt.clone(), tokens);
        let token = jwt.create_token("alice").unwrap();
        let header = format!("Bearer {token}");
        assert_eq!(ex.require_provider_key(Some(&header)).unwrap_err(), AuthError::ProviderKeyRequired);
    }

    #[test]
    fn require_provider_key_accepts_user_with_one() {
        let config = AuthConfig { jwt_secret: Some("s".into()), token_encryption_key: None, token_lifetime_hours: 8 };
        let jwt = Arc::new(JwtHandler::from_config(&config));
        let tokens = Arc::new(TokenStore::from_config(&config).unwrap());
        tokens.store_tokens("alice", "hub-tok", "alice", None, None, Some("sk-1".into())).unwrap();
        let ex = UserContextExtractor::new(jwt.clone(), tokens);
        let token = jwt.create_token("alice").unwrap();
        let header = format!("Bearer {token}");
        assert!(ex.require_provider_key(Some(&header)).is_ok());
    }
}
