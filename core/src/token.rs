use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, malformed token, or expired.
    Invalid,
    /// Signature checked out but `userId` or `email` is missing.
    MissingClaims,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Invalid => f.write_str("invalid or expired session token"),
            TokenError::MissingClaims => f.write_str("session token missing required claims"),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug, Serialize, Deserialize)]
struct RawClaims {
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    iat: i64,
    exp: i64,
}

/// Verifies HMAC-SHA256 session tokens minted by the authoring surface.
/// Does not touch the database.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The issuing side has no leeway; mirror that so "expired" means
        // expired.
        validation.leeway = 0;

        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let data = decode::<RawClaims>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::Invalid)?;

        let user_id = data
            .claims
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or(TokenError::MissingClaims)?;
        let email = data
            .claims
            .email
            .filter(|email| !email.is_empty())
            .ok_or(TokenError::MissingClaims)?;

        Ok(SessionClaims { user_id, email })
    }
}

/// Signs a session token. The relay never calls this in production (tokens
/// are pre-issued by the authoring surface, which shares this crate); it
/// backs the test suites.
pub fn sign_session(
    secret: &str,
    user_id: Option<&str>,
    email: Option<&str>,
    ttl_seconds: i64,
) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = RawClaims {
        user_id: user_id.map(str::to_owned),
        email: email.map(str::to_owned),
        iat: now,
        exp: now + ttl_seconds,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 signing cannot fail")
}
