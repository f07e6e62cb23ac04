//! HS256 verification and issuing.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use groupchat_core::{AuthError, AuthVerifier, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use crate::claims::Claims;

/// Verifies HS256 tokens against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; no grace window.
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Decode and check a token, returning its claims.
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                kind => {
                    debug!(error = ?kind, "token rejected");
                    AuthError::Invalid {
                        reason: format!("{kind:?}"),
                    }
                }
            })
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.decode_claims(token)?.user_id()
    }
}

/// Failure to mint a token.
#[derive(Debug, thiserror::Error)]
#[error("failed to sign token: {0}")]
pub struct IssueError(#[from] jsonwebtoken::errors::Error);

/// Mints HS256 tokens with a shared secret.
pub struct TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    /// Default token lifetime.
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    /// Issuer signing with `secret`, tokens valid for [`Self::DEFAULT_TTL_HOURS`].
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            ttl: Duration::hours(Self::DEFAULT_TTL_HOURS),
        }
    }

    /// Override the token lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Token for `user_id`, expiring after the configured lifetime.
    pub fn issue(&self, user_id: UserId) -> Result<String, IssueError> {
        let exp = (Utc::now() + self.ttl).timestamp();
        self.sign(&Claims::new(user_id, exp))
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, IssueError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.key)?)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
