//! `SessionService` facade and its composition root.

use crate::config::{Config, StoreBackend};
use crate::device::DeviceBinder;
use crate::error::{AuthError, ConfigError};
use crate::events::SecurityEventSink;
use crate::identity::{HttpIdentityProvider, IdentityProvider, UnconfiguredIdentityProvider};
use crate::instrument::{instrumented, Operation};
use crate::issuer::{AuthResult, TokenIssuer, TokenPair};
use crate::jwt::{Claims, JwtSerializer};
use crate::refresh::{RevocationReason, RotationCoordinator};
use crate::revocation::RevocationService;
use crate::status_cache::StatusCache;
use crate::storage::{CacheFamilyStore, FamilyStore, RedisFamilyStore, StoreHandle};
use crate::validator::TokenValidator;
use rust_common::{init_tracing, CacheClient, TelemetryClient};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for the gateway: login, refresh, validate, logout.
pub struct SessionService {
    issuer: TokenIssuer,
    validator: TokenValidator,
    rotator: RotationCoordinator,
    revocation: Arc<RevocationService>,
}

impl SessionService {
    /// Start building a service from `config`.
    #[must_use]
    pub fn builder(config: Config) -> SessionServiceBuilder {
        SessionServiceBuilder::new(config)
    }

    /// Load configuration from the environment, install tracing and build.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or a backend cannot be
    /// reached.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let config = Config::from_env()?;
        init_tracing(&config.tracing);
        Self::builder(config).build().await
    }

    /// Exchange an authorization code for a new credential pair bound to the device.
    ///
    /// # Errors
    ///
    /// `MissingDevice`, `IdentityProvider` or `StoreUnavailable`.
    pub async fn login(
        &self,
        auth_code: &str,
        device_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<AuthResult, AuthError> {
        instrumented(Operation::Login, async {
            let device = DeviceBinder::bind(device_id, fingerprint)?;
            self.issuer.issue(auth_code, device).await
        })
        .await
    }

    /// Rotate a refresh token.
    ///
    /// # Errors
    ///
    /// See [`RotationCoordinator::rotate`].
    pub async fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<TokenPair, AuthError> {
        instrumented(Operation::Refresh, self.rotator.rotate(refresh_token, device_id)).await
    }

    /// Validate an access token presented from `device_id`.
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate`].
    pub async fn validate(&self, access_token: &str, device_id: &str) -> Result<Claims, AuthError> {
        instrumented(Operation::Validate, self.validator.validate(access_token, device_id)).await
    }

    /// Revoke the token's family and every other session on the device.
    ///
    /// # Errors
    ///
    /// Credential errors from the local token checks, or `StoreUnavailable`.
    pub async fn logout(&self, access_token: &str, device_id: &str) -> Result<(), AuthError> {
        instrumented(Operation::Logout, async {
            let claims = self.validator.verify_bound(access_token, device_id)?;
            self.revocation
                .revoke(&claims.family_id, RevocationReason::Logout)
                .await?;
            self.revocation
                .revoke_and_clear_device(&claims.device_id, RevocationReason::Logout)
                .await?;
            Ok(())
        })
        .await
    }

    /// Revoke every family of a user. Returns how many were revoked.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn revoke_user(&self, user_id: &str) -> Result<usize, AuthError> {
        instrumented(
            Operation::RevokeUser,
            self.revocation.revoke_all_for_user(user_id, RevocationReason::Admin),
        )
        .await
    }

    /// Revoke a single family, e.g. on an upstream breach signal.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn revoke_family(&self, family_id: &str, reason: RevocationReason) -> Result<bool, AuthError> {
        instrumented(Operation::RevokeFamily, self.revocation.revoke(family_id, reason)).await
    }
}

/// Composition root for [`SessionService`].
///
/// Collaborators not supplied explicitly are built from the configuration.
pub struct SessionServiceBuilder {
    config: Config,
    store: Option<Arc<dyn FamilyStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    events: Option<Arc<dyn SecurityEventSink>>,
}

impl SessionServiceBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            identity: None,
            events: None,
        }
    }

    /// Use a specific family store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn FamilyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific identity provider.
    #[must_use]
    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use a specific security event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Wire the service.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or a backend cannot be
    /// constructed.
    pub async fn build(self) -> Result<SessionService, ConfigError> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Self::store_from_config(&config).await?,
        };
        let identity = match self.identity {
            Some(identity) => identity,
            None => Self::identity_from_config(&config)?,
        };
        let events: Arc<dyn SecurityEventSink> = match self.events {
            Some(events) => events,
            None => Arc::new(
                TelemetryClient::new(config.telemetry.clone())
                    .map_err(|e| ConfigError::new(format!("telemetry client: {e}")))?,
            ),
        };

        let store = StoreHandle::new(store, config.store_timeout);
        let jwt = Arc::new(JwtSerializer::new(
            &config.signing_key,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.access_token_ttl,
        ));
        let cache = Arc::new(StatusCache::new(
            config.status_cache_capacity,
            config.status_cache_ttl(),
        ));

        let revocation = Arc::new(RevocationService::new(store.clone(), cache.clone(), events.clone()));
        let issuer = TokenIssuer::new(
            identity,
            config.identity_timeout,
            store.clone(),
            jwt.clone(),
            config.refresh_token_ttl,
        );
        let validator = TokenValidator::new(jwt.clone(), store.clone(), cache);
        let rotator = RotationCoordinator::new(store, jwt, revocation.clone(), events, config.rotation_key.clone());

        info!(
            access_ttl_secs = config.access_token_ttl.as_secs(),
            status_cache_ttl_ms = config.status_cache_ttl().as_millis() as u64,
            "session service ready"
        );

        Ok(SessionService {
            issuer,
            validator,
            rotator,
            revocation,
        })
    }

    async fn store_from_config(config: &Config) -> Result<Arc<dyn FamilyStore>, ConfigError> {
        match &config.store_backend {
            StoreBackend::Memory => {
                let cache = Arc::new(CacheClient::new(config.cache.clone()));
                Ok(Arc::new(CacheFamilyStore::new(cache)))
            }
            StoreBackend::Redis { url } => {
                let store = RedisFamilyStore::connect(url, config.circuit_breaker.clone(), config.backend_timeout())
                    .await
                    .map_err(|e| ConfigError::new(format!("family store: {e}")))?;
                Ok(Arc::new(store))
            }
        }
    }

    fn identity_from_config(config: &Config) -> Result<Arc<dyn IdentityProvider>, ConfigError> {
        match &config.identity_exchange_url {
            Some(url) => {
                let provider = HttpIdentityProvider::new(url.clone(), config.identity_timeout)
                    .map_err(|e| ConfigError::new(format!("identity provider: {e}")))?;
                Ok(Arc::new(provider))
            }
            None => {
                warn!("IDENTITY_EXCHANGE_URL not set, logins will be refused");
                Ok(Arc::new(UnconfiguredIdentityProvider))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_from_ephemeral_config() {
        let service = SessionService::builder(Config::ephemeral()).build().await.unwrap();

        let err = service.login("code", Some("dev1"), None).await.unwrap_err();
        assert_eq!(err.code(), "IDENTITY_PROVIDER_ERROR");

        let err = service.login("code", None, None).await.unwrap_err();
        assert_eq!(err, AuthError::MissingDevice);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = Config::ephemeral().with_access_token_ttl(std::time::Duration::ZERO);
        assert!(SessionService::builder(config).build().await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_family_is_instrumented() {
        let service = SessionService::builder(Config::ephemeral()).build().await.unwrap();
        let histogram = crate::metrics::OPERATION_LATENCY.with_label_values(&["revoke_family", "ok"]);
        let before = histogram.get_sample_count();

        assert!(!service.revoke_family("unknown", RevocationReason::Admin).await.unwrap());
        assert!(histogram.get_sample_count() > before);
    }
}
