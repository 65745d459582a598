//! Rotation of refresh tokens and reuse detection.

use crate::config::SecretKey;
use crate::device::DeviceBinder;
use crate::error::AuthError;
use crate::events::{SecurityEvent, SecurityEventSink};
use crate::issuer::TokenPair;
use crate::jwt::JwtSerializer;
use crate::metrics;
use crate::refresh::family::{RevocationReason, TokenFamily};
use crate::refresh::generator::RefreshTokenGenerator;
use crate::revocation::RevocationService;
use crate::storage::{CasOutcome, StoreHandle};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Refresh state machine.
///
/// `Active(v, current)` advances to `Active(v + 1, next)` on a successful
/// rotation and to `Revoked` when a superseded token is presented.
pub struct RotationCoordinator {
    store: StoreHandle,
    jwt: Arc<JwtSerializer>,
    revocation: Arc<RevocationService>,
    events: Arc<dyn SecurityEventSink>,
    rotation_key: SecretKey,
}

impl RotationCoordinator {
    /// Create a coordinator deriving rotated secrets with `rotation_key`.
    pub fn new(
        store: StoreHandle,
        jwt: Arc<JwtSerializer>,
        revocation: Arc<RevocationService>,
        events: Arc<dyn SecurityEventSink>,
        rotation_key: SecretKey,
    ) -> Self {
        RotationCoordinator {
            store,
            jwt,
            revocation,
            events,
            rotation_key,
        }
    }

    /// Exchange the current refresh token for the next pair.
    ///
    /// Two requests rotating the same current token concurrently either both
    /// receive the same successor pair or, if the family moved on in between,
    /// the later one is treated as reuse.
    #[instrument(skip_all, fields(device_id = %device_id))]
    pub async fn rotate(&self, refresh_token: &str, device_id: &str) -> Result<TokenPair, AuthError> {
        let device_id = DeviceBinder::require(device_id)?;
        let family_id = RefreshTokenGenerator::family_id_of(refresh_token)?;

        let family = self
            .store
            .get(family_id)
            .await?
            .ok_or(AuthError::FamilyRevoked)?;

        if family.is_revoked() {
            metrics::record_rotation("revoked");
            return Err(AuthError::FamilyRevoked);
        }
        DeviceBinder::ensure_bound(&family.device_id, device_id)?;
        if family.is_expired(Utc::now()) {
            return Err(AuthError::Expired);
        }

        let presented_ref = RefreshTokenGenerator::hash(refresh_token);
        if !RefreshTokenGenerator::refs_equal(&presented_ref, &family.current_refresh_ref) {
            return Err(self.reuse_detected(&family, device_id).await);
        }

        let next_token = RefreshTokenGenerator::derive(
            self.rotation_key.expose(),
            family_id,
            family.version + 1,
            refresh_token,
        );
        let next = family.rotated(RefreshTokenGenerator::hash(&next_token));

        match self.store.compare_and_set(family.version, &next).await? {
            CasOutcome::Applied => {
                metrics::record_rotation("rotated");
                metrics::record_pair_issued("refresh");
                info!(
                    family_id = %family_id,
                    version = next.version,
                    "Rotated refresh token"
                );
                TokenPair::for_family(&self.jwt, &next, next_token)
            }
            CasOutcome::Missing => Err(AuthError::FamilyRevoked),
            CasOutcome::VersionConflict => {
                self.resolve_conflict(&family, &presented_ref, next_token, device_id)
                    .await
            }
        }
    }

    /// Decide what a lost compare-and-set means.
    async fn resolve_conflict(
        &self,
        read: &TokenFamily,
        presented_ref: &str,
        next_token: String,
        device_id: &str,
    ) -> Result<TokenPair, AuthError> {
        let current = self
            .store
            .get(&read.family_id)
            .await?
            .ok_or(AuthError::FamilyRevoked)?;

        if current.is_revoked() {
            metrics::record_rotation("revoked");
            return Err(AuthError::FamilyRevoked);
        }

        let next_ref = RefreshTokenGenerator::hash(&next_token);
        let same_successor = current.version == read.version + 1
            && RefreshTokenGenerator::refs_equal(&current.current_refresh_ref, &next_ref)
            && current
                .previous_refresh_ref
                .as_deref()
                .is_some_and(|previous| RefreshTokenGenerator::refs_equal(previous, presented_ref));

        if same_successor {
            // Another request rotated the same token first; hand back its pair.
            metrics::record_rotation("idempotent");
            debug!(family_id = %current.family_id, version = current.version, "rotation race resolved");
            return TokenPair::for_family(&self.jwt, &current, next_token);
        }

        Err(self.reuse_detected(&current, device_id).await)
    }

    /// Revoke the family and report the replay.
    async fn reuse_detected(&self, family: &TokenFamily, device_id: &str) -> AuthError {
        warn!(
            family_id = %family.family_id,
            user_id = %family.user_id,
            version = family.version,
            "Refresh token reuse detected - revoking token family"
        );
        metrics::record_rotation("reuse_detected");

        let revoked = self
            .revocation
            .revoke(&family.family_id, RevocationReason::ReuseDetected)
            .await;

        let event = SecurityEvent::ReuseDetected {
            family_id: family.family_id.clone(),
            user_id: family.user_id.clone(),
            device_id: family.device_id.clone(),
            presented_device_id: device_id.to_string(),
        };
        metrics::record_security_event(event.event_type());
        self.events.emit(event).await;

        match revoked {
            Ok(_) => AuthError::ReuseDetected,
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::FamilyStatus;
    use crate::status_cache::StatusCache;
    use crate::storage::CacheFamilyStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_common::{CacheClient, CacheClientConfig};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<SecurityEvent>>);

    #[async_trait]
    impl SecurityEventSink for Recorded {
        async fn emit(&self, event: SecurityEvent) {
            self.0.lock().push(event);
        }
    }

    struct Fixture {
        rotator: RotationCoordinator,
        store: StoreHandle,
        events: Arc<Recorded>,
        jwt: Arc<JwtSerializer>,
    }

    fn fixture() -> Fixture {
        let store = StoreHandle::new(
            Arc::new(CacheFamilyStore::new(Arc::new(CacheClient::new(CacheClientConfig::default())))),
            Duration::from_secs(1),
        );
        let jwt = Arc::new(JwtSerializer::new(
            &SecretKey::random(),
            "iss",
            "aud",
            Duration::from_secs(900),
        ));
        let events = Arc::new(Recorded::default());
        let cache = Arc::new(StatusCache::new(100, Duration::from_secs(60)));
        let revocation = Arc::new(RevocationService::new(store.clone(), cache, events.clone()));
        Fixture {
            rotator: RotationCoordinator::new(
                store.clone(),
                jwt.clone(),
                revocation,
                events.clone(),
                SecretKey::random(),
            ),
            store,
            events,
            jwt,
        }
    }

    async fn login(fx: &Fixture) -> String {
        let family_id = RefreshTokenGenerator::generate_family_id();
        let token = RefreshTokenGenerator::initial(&family_id);
        let family = TokenFamily::new(
            family_id,
            "user-1".to_string(),
            "dev1".to_string(),
            RefreshTokenGenerator::hash(&token),
            Duration::from_secs(3600),
        );
        fx.store.create(&family).await.unwrap();
        token
    }

    #[tokio::test]
    async fn test_rotation_advances_family() {
        let fx = fixture();
        let r1 = login(&fx).await;

        let pair = fx.rotator.rotate(&r1, "dev1").await.unwrap();
        assert_ne!(pair.refresh_token, r1);

        let family_id = RefreshTokenGenerator::family_id_of(&r1).unwrap();
        let family = fx.store.get(family_id).await.unwrap().unwrap();
        assert_eq!(family.version, 1);
        assert_eq!(family.current_refresh_ref, RefreshTokenGenerator::hash(&pair.refresh_token));
        assert_eq!(family.previous_refresh_ref, Some(RefreshTokenGenerator::hash(&r1)));

        let claims = fx.jwt.verify(&pair.access_token).unwrap();
        assert_eq!(claims.jti, format!("{family_id}:1"));
    }

    #[tokio::test]
    async fn test_reuse_revokes_family() {
        let fx = fixture();
        let r1 = login(&fx).await;
        let r2 = fx.rotator.rotate(&r1, "dev1").await.unwrap().refresh_token;
        let reuse_counter = metrics::SECURITY_EVENTS.with_label_values(&["REUSE_DETECTED"]);
        let before = reuse_counter.get();

        assert_eq!(fx.rotator.rotate(&r1, "dev1").await, Err(AuthError::ReuseDetected));
        assert!(reuse_counter.get() >= before + 1.0);

        let family_id = RefreshTokenGenerator::family_id_of(&r1).unwrap();
        let family = fx.store.get(family_id).await.unwrap().unwrap();
        assert_eq!(family.status, FamilyStatus::Revoked);
        assert_eq!(family.revocation_reason, Some(RevocationReason::ReuseDetected));

        let events = fx.events.0.lock().clone();
        assert!(events.iter().any(|e| matches!(e, SecurityEvent::ReuseDetected { .. })));

        // The legitimate successor is dead too.
        assert_eq!(fx.rotator.rotate(&r2, "dev1").await, Err(AuthError::FamilyRevoked));
    }

    #[tokio::test]
    async fn test_device_mismatch_does_not_revoke() {
        let fx = fixture();
        let r1 = login(&fx).await;

        assert_eq!(fx.rotator.rotate(&r1, "dev2").await, Err(AuthError::DeviceMismatch));
        assert!(fx.rotator.rotate(&r1, "dev1").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens() {
        let fx = fixture();
        assert_eq!(fx.rotator.rotate("junk", "dev1").await, Err(AuthError::InvalidSignature));

        let orphan = RefreshTokenGenerator::initial(&RefreshTokenGenerator::generate_family_id());
        assert_eq!(fx.rotator.rotate(&orphan, "dev1").await, Err(AuthError::FamilyRevoked));
        assert_eq!(fx.rotator.rotate(&orphan, " ").await, Err(AuthError::MissingDevice));
    }

    #[tokio::test]
    async fn test_conflict_resolves_to_winner_pair() {
        let fx = fixture();
        let r1 = login(&fx).await;
        let family_id = RefreshTokenGenerator::family_id_of(&r1).unwrap();
        let read = fx.store.get(family_id).await.unwrap().unwrap();

        // Simulate a loser whose compare-and-set came after the winner's.
        let winner = fx.rotator.rotate(&r1, "dev1").await.unwrap();
        let derived = RefreshTokenGenerator::derive(
            fx.rotator.rotation_key.expose(),
            family_id,
            read.version + 1,
            &r1,
        );
        let loser = fx
            .rotator
            .resolve_conflict(&read, &RefreshTokenGenerator::hash(&r1), derived, "dev1")
            .await
            .unwrap();

        assert_eq!(winner, loser);
    }
}
