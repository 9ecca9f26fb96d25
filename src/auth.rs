//! Access tokens
//!
//! Callers authenticate with HS256 JWTs whose `sub` claim is the numeric
//! user id. Registration and login live elsewhere; this module only issues
//! tokens for operators and verifies them at the HTTP edge.

use crate::config::AuthConfig;
use crate::error::{ChatError, Result};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// The identity carried by a verified token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
}

/// Verifies bearer tokens
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// `InvalidToken` for a bad signature, wrong issuer, expiry, or a
    /// non-numeric subject.
    fn verify(&self, token: &str) -> Result<Identity>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// HS256 token issuer and verifier
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl_secs: i64,
}

impl JwtAuth {
    /// Create an issuer/verifier from the access-token settings
    ///
    /// # Arguments
    ///
    /// * `config` - Signing secret, issuer, and token lifetime
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            ttl_secs: config.token_ttl_secs as i64,
        }
    }

    /// Issue a token for `user_id`
    ///
    /// # Arguments
    ///
    /// * `user_id` - Numeric user id written to the `sub` claim
    ///
    /// # Returns
    ///
    /// Returns a compact HS256 JWT valid for the configured lifetime
    ///
    /// # Errors
    ///
    /// Returns a configuration error if signing fails
    ///
    /// # Examples
    ///
    /// ```
    /// use chatbridge::auth::{JwtAuth, TokenVerifier};
    /// use chatbridge::config::AuthConfig;
    ///
    /// let auth = JwtAuth::new(&AuthConfig::default());
    /// let token = auth.issue(42).unwrap();
    /// assert_eq!(auth.verify(&token).unwrap().user_id, 42);
    /// ```
    pub fn issue(&self, user_id: i64) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!("Failed to sign access token for user {}: {}", user_id, e);
            ChatError::Config(format!("Failed to sign access token: {}", e)).into()
        })
    }
}

impl TokenVerifier for JwtAuth {
    fn verify(&self, token: &str) -> Result<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["sub", "iss", "exp"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!("Rejected access token: {}", e);
            ChatError::InvalidToken(e.to_string())
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| ChatError::InvalidToken("subject is not a user id".to_string()))?;
        Ok(Identity { user_id })
    }
}
