//! Signed bearer tokens.
//!
//! [`TokenCodec`] issues and verifies HS256 JWTs carrying a worker identity,
//! an issued-at time and a short expiry. The signing secret is passed in at
//! construction and lives as long as the codec; there is no process global.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::DEFAULT_TOKEN_TTL;

/// Token signing and verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Wrong algorithm or signature mismatch.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token's `exp` claim has passed.
    #[error("token expired")]
    Expired,

    /// The token or its claims failed structural validation.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The codec could not sign a token.
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity of the token holder.
    pub soldier_id: String,
    /// Subject, always equal to `soldier_id`.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Unique token id so renewals within the same second still differ.
    pub jti: String,
}

impl Claims {
    /// Claims for `identity`, issued now and valid for `validity`.
    pub fn new(identity: impl Into<String>, validity: Duration) -> Self {
        let identity = identity.into();
        let now = Utc::now().timestamp();
        let validity = i64::try_from(validity.as_secs()).unwrap_or(i64::MAX);
        Self {
            sub: identity.clone(),
            soldier_id: identity,
            iat: now,
            exp: now.saturating_add(validity),
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// The holder's identity.
    pub fn identity(&self) -> &str {
        &self.soldier_id
    }
}

/// Issues and verifies bearer tokens with a fixed symmetric key.
///
/// # Examples
///
/// ```
/// use mission_control::auth::TokenCodec;
///
/// let codec = TokenCodec::new("shared-secret");
/// let token = codec.issue("soldier-1").unwrap();
/// let claims = codec.verify(&token).unwrap();
/// assert_eq!(claims.identity(), "soldier-1");
/// ```
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    validity: Duration,
}

impl TokenCodec {
    /// Creates a codec signing with `secret`, issuing 30 second tokens.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            validity: DEFAULT_TOKEN_TTL,
        }
    }

    /// Sets the validity window stamped into issued tokens.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Validity window stamped into issued tokens.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issues a token for `identity`.
    pub fn issue(&self, identity: &str) -> Result<String, TokenError> {
        self.sign(&Claims::new(identity, self.validity))
    }

    /// Signs explicit claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`TokenError::InvalidSignature`] for a foreign key or algorithm
    /// - [`TokenError::Expired`] once `exp` has passed
    /// - [`TokenError::Malformed`] for anything that is not a well-formed token
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.soldier_id.is_empty() {
            return Err(TokenError::Malformed("empty identity".to_string()));
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .field("validity", &self.validity)
            .finish()
    }
}
