//! Login: authorization code in, first credential pair of a new family out.

use crate::device::DeviceContext;
use crate::error::AuthError;
use crate::identity::{IdentityClaims, IdentityProvider};
use crate::jwt::JwtSerializer;
use crate::metrics;
use crate::refresh::{RefreshTokenGenerator, TokenFamily};
use crate::storage::{FamilyIndex, StoreHandle};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Access and refresh credentials handed to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Signed access token
    pub access_token: String,
    /// Opaque single-use refresh token
    pub refresh_token: String,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Family expiry; the refresh token is useless after this
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Mint the pair for the family's current version.
    pub(crate) fn for_family(
        jwt: &JwtSerializer,
        family: &TokenFamily,
        refresh_token: String,
    ) -> Result<Self, AuthError> {
        let (access_token, exp) = jwt.mint(family)?;
        Ok(Self {
            access_token,
            refresh_token,
            access_expires_at: Utc.timestamp_opt(exp, 0).single().unwrap_or(family.expires_at),
            refresh_expires_at: family.expires_at,
        })
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Issued credentials
    pub tokens: TokenPair,
    /// Device the credentials are bound to
    pub device: DeviceContext,
    /// Identity asserted by the provider
    pub identity: IdentityClaims,
}

/// Mints the first credential pair of a new family.
pub struct TokenIssuer {
    identity: Arc<dyn IdentityProvider>,
    identity_timeout: Duration,
    store: StoreHandle,
    jwt: Arc<JwtSerializer>,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        identity_timeout: Duration,
        store: StoreHandle,
        jwt: Arc<JwtSerializer>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            identity,
            identity_timeout,
            store,
            jwt,
            refresh_ttl,
        }
    }

    /// Exchange `auth_code` and open a new family bound to `device`.
    ///
    /// The family and both of its indexes are persisted before any token is
    /// returned.
    ///
    /// # Errors
    ///
    /// `IdentityProvider` when the exchange fails or times out,
    /// `StoreUnavailable` when the family cannot be persisted.
    #[instrument(skip_all, fields(device_id = %device.device_id))]
    pub async fn issue(&self, auth_code: &str, device: DeviceContext) -> Result<AuthResult, AuthError> {
        if auth_code.trim().is_empty() {
            return Err(AuthError::IdentityProvider("empty authorization code".to_string()));
        }

        let identity = match tokio::time::timeout(self.identity_timeout, self.identity.exchange(auth_code)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(error = %e, "authorization code exchange failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!("authorization code exchange timed out");
                return Err(AuthError::IdentityProvider("exchange timed out".to_string()));
            }
        };

        let family_id = RefreshTokenGenerator::generate_family_id();
        let refresh_token = RefreshTokenGenerator::initial(&family_id);
        let family = TokenFamily::new(
            family_id,
            identity.user_id.clone(),
            device.device_id.clone(),
            RefreshTokenGenerator::hash(&refresh_token),
            self.refresh_ttl,
        );
        let tokens = TokenPair::for_family(&self.jwt, &family, refresh_token)?;

        self.store.create(&family).await?;
        let index_ttl = self.refresh_ttl;
        self.store
            .add_to_index(&FamilyIndex::Device(family.device_id.clone()), &family.family_id, index_ttl)
            .await?;
        self.store
            .add_to_index(&FamilyIndex::User(family.user_id.clone()), &family.family_id, index_ttl)
            .await?;

        metrics::record_pair_issued("login");
        info!(
            family_id = %family.family_id,
            user_id = %family.user_id,
            "Created new token family"
        );

        Ok(AuthResult {
            tokens,
            device,
            identity,
        })
    }
}
