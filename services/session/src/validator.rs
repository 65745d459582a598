//! Access token validation.

use crate::device::DeviceBinder;
use crate::error::AuthError;
use crate::jwt::{Claims, JwtSerializer};
use crate::refresh::FamilyStatus;
use crate::status_cache::StatusCache;
use crate::storage::StoreHandle;
use std::sync::Arc;
use tracing::debug;

/// Verifies access tokens and the revocation status of their family.
pub struct TokenValidator {
    jwt: Arc<JwtSerializer>,
    store: StoreHandle,
    cache: Arc<StatusCache>,
}

impl TokenValidator {
    /// Create a validator.
    pub fn new(jwt: Arc<JwtSerializer>, store: StoreHandle, cache: Arc<StatusCache>) -> Self {
        Self { jwt, store, cache }
    }

    /// Full validation: signature, expiry, device binding and family status.
    ///
    /// Fails closed: when the store cannot be reached and no fresh status is
    /// cached, the token is rejected with `StoreUnavailable`.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub async fn validate(&self, access_token: &str, device_id: &str) -> Result<Claims, AuthError> {
        let claims = self.verify_bound(access_token, device_id)?;

        match self.family_status(&claims.family_id, &claims.device_id).await? {
            FamilyStatus::Active => Ok(claims),
            FamilyStatus::Revoked => {
                debug!(family_id = %claims.family_id, "access token from revoked family");
                Err(AuthError::FamilyRevoked)
            }
        }
    }

    /// Local checks only: device presence, signature, expiry and binding.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn verify_bound(&self, access_token: &str, device_id: &str) -> Result<Claims, AuthError> {
        let device_id = DeviceBinder::require(device_id)?;
        let claims = self.jwt.verify(access_token)?;
        DeviceBinder::ensure_bound(&claims.device_id, device_id)?;
        Ok(claims)
    }

    async fn family_status(&self, family_id: &str, device_id: &str) -> Result<FamilyStatus, AuthError> {
        if let Some(status) = self.cache.get_fresh(family_id) {
            return Ok(status);
        }

        // An expired or deleted record is as good as revoked.
        let status = self
            .store
            .get(family_id)
            .await?
            .map_or(FamilyStatus::Revoked, |family| family.status);

        self.cache.insert(family_id, device_id, status);
        Ok(status)
    }
}
