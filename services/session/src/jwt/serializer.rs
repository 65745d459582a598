//! HS256 access token signing and verification.

use crate::config::SecretKey;
use crate::error::AuthError;
use crate::jwt::claims::Claims;
use crate::refresh::TokenFamily;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;

/// Signs and verifies HS256 access tokens.
pub struct JwtSerializer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtSerializer {
    /// Create a serializer stamping and requiring `issuer` and `audience`.
    pub fn new(key: &SecretKey, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iat", "nbf", "iss", "aud", "sub"]);

        JwtSerializer {
            encoding_key: EncodingKey::from_secret(key.expose()),
            decoding_key: DecodingKey::from_secret(key.expose()),
            validation,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    /// Access token for the family's current version.
    ///
    /// Returns the token and its `exp` timestamp.
    pub fn mint(&self, family: &TokenFamily) -> Result<(String, i64), AuthError> {
        let claims = Claims::for_family(family, &self.issuer, &self.audience, self.ttl);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            // Encoding only fails on serialization of our own claims type.
            .map_err(|_| AuthError::InvalidSignature)?;
        Ok((token, claims.exp))
    }

    /// Verify signature, issuer, audience and lifetime.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                kind => {
                    debug!(error = ?kind, "access token rejected");
                    AuthError::InvalidSignature
                }
            })
    }
}
