//! Access token claims.

use crate::refresh::TokenFamily;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    // Standard JWT claims
    /// Issuer
    pub iss: String,
    /// Subject (user id)
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// Not before
    pub nbf: i64,
    /// `family_id:version`
    pub jti: String,

    // Session binding
    /// Bound device
    pub device_id: String,
    /// Originating family
    pub family_id: String,
}

impl Claims {
    /// Claims for the access token paired with the family's current refresh token.
    ///
    /// Everything is taken from the record, so minting twice from the same
    /// record version yields the same token.
    pub fn for_family(family: &TokenFamily, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let iat = family.last_rotation_at.timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Claims {
            iss: issuer.to_string(),
            sub: family.user_id.clone(),
            aud: audience.to_string(),
            exp: iat.saturating_add(ttl),
            iat,
            nbf: iat,
            jti: format!("{}:{}", family.family_id, family.version),
            device_id: family.device_id.clone(),
            family_id: family.family_id.clone(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.sub
    }
}
