use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use uuid::Uuid;

use crate::database::DatabaseError;
use crate::services::users::{AccessToken, AccessTokenStore, User, UserStore};

/// Header carrying a personal access token (`<prefix>.<key>`)
pub const PRIVATE_TOKEN_HEADER: &str = "Private-Token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Identity of the user, matched against `User::identity`
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(sub: impl Into<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: sub.into(),
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// SHA-256 hex digest stored in place of an access token key
pub fn hash_token_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A new access token record and the `<prefix>.<key>` string handed to its owner
pub fn new_access_token(user_id: Uuid, name: &str, expires: Option<DateTime<Utc>>) -> (AccessToken, String) {
    let prefix = Uuid::new_v4().simple().to_string()[..8].to_string();
    let key = Uuid::new_v4().simple().to_string();
    let token = AccessToken {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        prefix: prefix.clone(),
        key_hash: hash_token_key(&key),
        created: Utc::now(),
        expires,
        revoked: false,
    };
    (token, format!("{}.{}", prefix, key))
}

/// Why a request has no resolved user.
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// No bearer token, or one that could not be verified
    #[error("no identity in request")]
    NoIdentity,

    /// A valid bearer token whose identity matches no user
    #[error("no user for identity {0}")]
    UnknownUser(String),

    /// A personal access token was sent but is unknown, revoked or expired
    #[error("invalid access token")]
    InvalidToken,

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl AuthFailure {
    /// Outcomes that routes allowing anonymous access may ignore
    pub fn is_anonymous(&self) -> bool {
        matches!(self, AuthFailure::NoIdentity | AuthFailure::UnknownUser(_))
    }
}

/// Resolves the acting user from request headers.
///
/// A `Private-Token` header takes precedence over `Authorization: Bearer`.
/// Resolution only reads from the stores, so calling it twice with the same
/// headers yields the same user.
#[derive(Clone)]
pub struct AuthResolver {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn AccessTokenStore>,
    secret: String,
}

impl AuthResolver {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<dyn AccessTokenStore>, secret: impl Into<String>) -> Self {
        Self {
            users,
            tokens,
            secret: secret.into(),
        }
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<User, AuthFailure> {
        if let Some(value) = headers.get(PRIVATE_TOKEN_HEADER) {
            let token = value.to_str().map_err(|_| AuthFailure::InvalidToken)?;
            return self.resolve_access_token(token).await;
        }

        let identity = self.bearer_identity(headers).ok_or(AuthFailure::NoIdentity)?;
        match self.users.by_identity(&identity).await? {
            Some(user) => Ok(user),
            None => Err(AuthFailure::UnknownUser(identity)),
        }
    }

    async fn resolve_access_token(&self, token: &str) -> Result<User, AuthFailure> {
        let (prefix, key) = token.trim().split_once('.').ok_or(AuthFailure::InvalidToken)?;
        if prefix.is_empty() || key.is_empty() {
            return Err(AuthFailure::InvalidToken);
        }

        let stored = self.tokens.by_prefix(prefix).await?.ok_or_else(|| {
            tracing::warn!("Access token rejected: unknown prefix '{}'", prefix);
            AuthFailure::InvalidToken
        })?;
        if stored.revoked || stored.is_expired(Utc::now()) {
            tracing::warn!("Access token rejected: '{}' is revoked or expired", stored.name);
            return Err(AuthFailure::InvalidToken);
        }
        if stored.key_hash != hash_token_key(key) {
            tracing::warn!("Access token rejected: key mismatch for prefix '{}'", prefix);
            return Err(AuthFailure::InvalidToken);
        }

        self.users.by_id(stored.user_id).await?.ok_or(AuthFailure::InvalidToken)
    }

    /// Identity of a verified bearer token, ignoring `Private-Token`.
    ///
    /// Account management (sign up, login, access tokens) only accepts a
    /// bearer token.
    pub fn bearer(&self, headers: &HeaderMap) -> Result<String, AuthFailure> {
        self.bearer_identity(headers).ok_or(AuthFailure::NoIdentity)
    }

    /// The `sub` claim of a verified bearer token
    fn bearer_identity(&self, headers: &HeaderMap) -> Option<String> {
        let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
        let token = auth.strip_prefix("Bearer ")?.trim();
        if token.is_empty() || self.secret.is_empty() {
            return None;
        }

        let key = DecodingKey::from_secret(self.secret.as_bytes());
        match decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)) {
            Ok(data) if !data.claims.sub.is_empty() => Some(data.claims.sub),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Bearer token rejected: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::MemoryBackend;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn resolver(backend: &MemoryBackend) -> AuthResolver {
        AuthResolver::new(Arc::new(backend.clone()), Arc::new(backend.clone()), SECRET)
    }

    fn memory_backend() -> MemoryBackend {
        let config = AppConfig::development();
        MemoryBackend::new(&config.storage, &config.competition)
    }

    fn bearer(sub: &str) -> HeaderMap {
        let jwt = generate_jwt(&Claims::new(sub, 1), SECRET).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {}", jwt)).unwrap());
        headers
    }

    #[tokio::test]
    async fn bearer_token_resolves_user() {
        let backend = memory_backend();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let user = resolver(&backend).resolve(&bearer("auth0|alice")).await.unwrap();
        assert_eq!(user, alice);
    }

    #[tokio::test]
    async fn anonymous_outcomes() {
        let backend = memory_backend();
        let resolver = resolver(&backend);

        let none = resolver.resolve(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(none, AuthFailure::NoIdentity));
        assert!(none.is_anonymous());

        let unknown = resolver.resolve(&bearer("auth0|ghost")).await.unwrap_err();
        assert!(matches!(unknown, AuthFailure::UnknownUser(_)));
        assert!(unknown.is_anonymous());

        let mut garbage = HeaderMap::new();
        garbage.insert("authorization", HeaderValue::from_static("Bearer not-a-jwt"));
        assert!(matches!(resolver.resolve(&garbage).await.unwrap_err(), AuthFailure::NoIdentity));
    }

    #[tokio::test]
    async fn private_token_is_idempotent_and_revocable() {
        let backend = memory_backend();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let token = backend.issue_access_token(&alice, "ci").await;
        let resolver = resolver(&backend);

        let mut headers = bearer("auth0|nobody");
        headers.insert(PRIVATE_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        let first = resolver.resolve(&headers).await.unwrap();
        let second = resolver.resolve(&headers).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.username, "alice");

        backend.revoke_access_token(&token).await;
        let err = resolver.resolve(&headers).await.unwrap_err();
        assert!(matches!(err, AuthFailure::InvalidToken));
        assert!(!err.is_anonymous());
    }

    #[tokio::test]
    async fn private_token_with_wrong_key() {
        let backend = memory_backend();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let token = backend.issue_access_token(&alice, "ci").await;
        let prefix = token.split('.').next().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            PRIVATE_TOKEN_HEADER,
            HeaderValue::from_str(&format!("{}.wrong", prefix)).unwrap(),
        );
        assert!(matches!(
            resolver(&backend).resolve(&headers).await.unwrap_err(),
            AuthFailure::InvalidToken
        ));
    }

    #[tokio::test]
    async fn bearer_ignores_private_token() {
        let backend = memory_backend();
        let alice = backend.add_user("alice", "auth0|alice").await;
        let token = backend.issue_access_token(&alice, "ci").await;
        let resolver = resolver(&backend);

        let mut headers = HeaderMap::new();
        headers.insert(PRIVATE_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        assert!(resolver.resolve(&headers).await.is_ok());
        assert!(matches!(resolver.bearer(&headers), Err(AuthFailure::NoIdentity)));

        assert_eq!(resolver.bearer(&bearer("auth0|new")).unwrap(), "auth0|new");
    }

    #[test]
    fn new_token_key_matches_digest() {
        let owner = Uuid::new_v4();
        let (token, issued) = new_access_token(owner, "ci", None);
        let (prefix, key) = issued.split_once('.').unwrap();
        assert_eq!(prefix, token.prefix);
        assert_eq!(prefix.len(), 8);
        assert_eq!(token.key_hash, hash_token_key(key));
        assert_eq!(token.user_id, owner);
    }

    #[test]
    fn key_digest_is_hex() {
        let digest = hash_token_key("secret");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
