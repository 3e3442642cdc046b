//! User tokens presented by dashboard clients

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

/// User token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTokenClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,
}

/// A verified user token
#[derive(Debug, Clone)]
pub struct UserToken {
    pub claims: UserTokenClaims,
}

impl UserToken {
    /// The user the token was issued to
    pub fn user_id(&self) -> Result<i64, DeckhandError> {
        self.claims
            .sub
            .parse()
            .map_err(|_| DeckhandError::AuthError(format!("Invalid subject: {}", self.claims.sub)))
    }
}

/// Signs and verifies HS256 user tokens
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// Verify signature and expiry
    pub fn verify(&self, raw: &str) -> Result<UserToken, DeckhandError> {
        let data = decode::<UserTokenClaims>(raw, &self.decoding, &self.validation)
            .map_err(|e| DeckhandError::AuthError(format!("Failed to verify token: {}", e)))?;
        let token = UserToken {
            claims: data.claims,
        };
        token.user_id()?;
        Ok(token)
    }

    /// Issue a token for `user_id` valid for `ttl_secs`
    pub fn issue(&self, user_id: i64, ttl_secs: i64) -> Result<String, DeckhandError> {
        let now = Utc::now().timestamp();
        let claims = UserTokenClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DeckhandError::AuthError(format!("Failed to sign token: {}", e)))
    }
}
