//! Family revocation: logout, breach signals and operator action.
//!
//! Revocation bumps the record version through compare-and-set, so a
//! rotation racing with it can never write the family back to `Active`.
//! Records are never deleted here; they stay until store expiry so replays
//! keep resolving to `FamilyRevoked`.

use crate::error::AuthError;
use crate::events::{SecurityEvent, SecurityEventSink};
use crate::metrics;
use crate::refresh::{RevocationReason, TokenFamily};
use crate::status_cache::StatusCache;
use crate::storage::{CasOutcome, FamilyIndex, StoreHandle};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const MAX_CAS_ATTEMPTS: usize = 5;

/// Marks families revoked and purges local status entries.
pub struct RevocationService {
    store: StoreHandle,
    cache: Arc<StatusCache>,
    events: Arc<dyn SecurityEventSink>,
}

impl RevocationService {
    /// Create a revocation service.
    pub fn new(store: StoreHandle, cache: Arc<StatusCache>, events: Arc<dyn SecurityEventSink>) -> Self {
        Self { store, cache, events }
    }

    /// Revoke one family. Idempotent.
    ///
    /// Returns `true` when this call performed the revocation, `false` when
    /// the family was already revoked or does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` when the store cannot be reached or the
    /// record keeps changing underneath every attempt.
    #[instrument(skip(self))]
    pub async fn revoke(&self, family_id: &str, reason: RevocationReason) -> Result<bool, AuthError> {
        Ok(self.revoke_record(family_id, reason).await? == Revocation::Applied)
    }

    /// Revoke every family bound to a device and drop its cached statuses.
    ///
    /// Returns the number of families this call revoked.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on the first store failure; already
    /// revoked families stay revoked and the call may be repeated.
    #[instrument(skip(self))]
    pub async fn revoke_and_clear_device(&self, device_id: &str, reason: RevocationReason) -> Result<usize, AuthError> {
        let cleared = self.cache.invalidate_device(device_id);
        let revoked = self
            .revoke_index(&FamilyIndex::Device(device_id.to_string()), reason)
            .await?;

        info!(device_id = %device_id, revoked, cleared, "Cleared device sessions");
        Ok(revoked)
    }

    /// Revoke every family owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on the first store failure.
    #[instrument(skip(self))]
    pub async fn revoke_all_for_user(&self, user_id: &str, reason: RevocationReason) -> Result<usize, AuthError> {
        let revoked = self
            .revoke_index(&FamilyIndex::User(user_id.to_string()), reason)
            .await?;

        info!(user_id = %user_id, count = revoked, "Revoked all user token families");
        Ok(revoked)
    }

    /// Revoke every member of `index`, dropping ids whose record has expired.
    async fn revoke_index(&self, index: &FamilyIndex, reason: RevocationReason) -> Result<usize, AuthError> {
        let families = self.store.index_members(index).await?;

        let mut revoked = 0;
        for family_id in &families {
            match self.revoke_record(family_id, reason).await? {
                Revocation::Applied => revoked += 1,
                Revocation::AlreadyRevoked => {}
                Revocation::Absent => self.prune(index, family_id).await,
            }
        }
        Ok(revoked)
    }

    async fn revoke_record(&self, family_id: &str, reason: RevocationReason) -> Result<Revocation, AuthError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(family) = self.store.get(family_id).await? else {
                self.cache.invalidate(family_id);
                return Ok(Revocation::Absent);
            };

            if family.is_revoked() {
                self.cache.mark_revoked(family_id, &family.device_id);
                self.unindex(&family).await;
                return Ok(Revocation::AlreadyRevoked);
            }

            let revoked = family.revoked(reason);
            match self.store.compare_and_set(family.version, &revoked).await? {
                CasOutcome::Applied => {
                    self.cache.mark_revoked(family_id, &family.device_id);
                    metrics::record_family_revoked(reason.as_str());
                    info!(
                        family_id = %family_id,
                        user_id = %family.user_id,
                        version = revoked.version,
                        reason = %reason,
                        "Revoked token family"
                    );
                    self.unindex(&family).await;

                    let event = SecurityEvent::FamilyRevoked {
                        family_id: family_id.to_string(),
                        user_id: family.user_id,
                        reason,
                    };
                    metrics::record_security_event(event.event_type());
                    self.events.emit(event).await;
                    return Ok(Revocation::Applied);
                }
                CasOutcome::Missing => {
                    self.cache.invalidate(family_id);
                    return Ok(Revocation::Absent);
                }
                CasOutcome::VersionConflict => {
                    debug!(family_id = %family_id, attempt, "revocation lost a race, retrying");
                }
            }
        }

        warn!(family_id = %family_id, "revocation gave up after repeated conflicts");
        Err(AuthError::StoreUnavailable(format!(
            "revocation of {family_id} conflicted {MAX_CAS_ATTEMPTS} times"
        )))
    }

    /// Drop a revoked family from both of its indexes.
    async fn unindex(&self, family: &TokenFamily) {
        self.prune(&FamilyIndex::Device(family.device_id.clone()), &family.family_id)
            .await;
        self.prune(&FamilyIndex::User(family.user_id.clone()), &family.family_id)
            .await;
    }

    // Index cleanup never fails a revocation; a leftover id is pruned on the next scan.
    async fn prune(&self, index: &FamilyIndex, family_id: &str) {
        if let Err(e) = self.store.remove_from_index(index, family_id).await {
            debug!(family_id = %family_id, index = %index.key(), error = %e, "index cleanup deferred");
        }
    }
}

/// What a single revocation attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revocation {
    Applied,
    AlreadyRevoked,
    Absent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SecurityEvent;
    use crate::refresh::{FamilyStatus, TokenFamily};
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
        service: RevocationService,
        store: StoreHandle,
        cache: Arc<StatusCache>,
        events: Arc<Recorded>,
    }

    fn fixture() -> Fixture {
        let store = StoreHandle::new(
            Arc::new(CacheFamilyStore::new(Arc::new(CacheClient::new(CacheClientConfig::default())))),
            Duration::from_secs(1),
        );
        let cache = Arc::new(StatusCache::new(100, Duration::from_secs(60)));
        let events = Arc::new(Recorded::default());
        Fixture {
            service: RevocationService::new(store.clone(), cache.clone(), events.clone()),
            store,
            cache,
            events,
        }
    }

    async fn family(fx: &Fixture, id: &str, user: &str, device: &str) -> TokenFamily {
        let family = TokenFamily::new(
            id.to_string(),
            user.to_string(),
            device.to_string(),
            format!("ref-{id}"),
            Duration::from_secs(3600),
        );
        fx.store.create(&family).await.unwrap();
        let ttl = Duration::from_secs(3600);
        fx.store
            .add_to_index(&FamilyIndex::Device(device.to_string()), id, ttl)
            .await
            .unwrap();
        fx.store
            .add_to_index(&FamilyIndex::User(user.to_string()), id, ttl)
            .await
            .unwrap();
        family
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let fx = fixture();
        family(&fx, "f1", "u1", "d1").await;

        assert!(fx.service.revoke("f1", RevocationReason::Logout).await.unwrap());
        assert!(!fx.service.revoke("f1", RevocationReason::Logout).await.unwrap());

        let stored = fx.store.get("f1").await.unwrap().unwrap();
        assert_eq!(stored.status, FamilyStatus::Revoked);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.revocation_reason, Some(RevocationReason::Logout));
        assert_eq!(fx.cache.get_fresh("f1"), Some(FamilyStatus::Revoked));
        assert_eq!(fx.events.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_absent_family_succeeds() {
        let fx = fixture();
        assert!(!fx.service.revoke("nope", RevocationReason::Admin).await.unwrap());
        assert!(fx.events.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_and_clear_device() {
        let fx = fixture();
        family(&fx, "f1", "u1", "d1").await;
        family(&fx, "f2", "u1", "d1").await;
        family(&fx, "f3", "u1", "d2").await;
        fx.cache.insert("f3", "d2", FamilyStatus::Active);

        let count = fx
            .service
            .revoke_and_clear_device("d1", RevocationReason::Logout)
            .await
            .unwrap();
        assert_eq!(count, 2);

        assert!(fx.store.get("f1").await.unwrap().unwrap().is_revoked());
        assert!(fx.store.get("f2").await.unwrap().unwrap().is_revoked());
        assert!(!fx.store.get("f3").await.unwrap().unwrap().is_revoked());
        assert_eq!(fx.cache.get_fresh("f3"), Some(FamilyStatus::Active));
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let fx = fixture();
        family(&fx, "f1", "u1", "d1").await;
        family(&fx, "f2", "u1", "d2").await;
        family(&fx, "f3", "u2", "d3").await;

        let count = fx
            .service
            .revoke_all_for_user("u1", RevocationReason::Admin)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(!fx.store.get("f3").await.unwrap().unwrap().is_revoked());
    }

    #[tokio::test]
    async fn test_revocation_prunes_indexes() {
        let fx = fixture();
        family(&fx, "f1", "u1", "d1").await;
        family(&fx, "f2", "u1", "d1").await;

        assert!(fx.service.revoke("f1", RevocationReason::Logout).await.unwrap());
        let device = FamilyIndex::Device("d1".to_string());
        let user = FamilyIndex::User("u1".to_string());
        assert_eq!(fx.store.index_members(&device).await.unwrap(), vec!["f2".to_string()]);
        assert_eq!(fx.store.index_members(&user).await.unwrap(), vec!["f2".to_string()]);

        fx.service
            .revoke_and_clear_device("d1", RevocationReason::Logout)
            .await
            .unwrap();
        assert!(fx.store.index_members(&device).await.unwrap().is_empty());
        assert!(fx.store.index_members(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_drops_expired_members() {
        let fx = fixture();
        let ttl = Duration::from_secs(3600);
        let device = FamilyIndex::Device("d9".to_string());
        fx.store.add_to_index(&device, "gone", ttl).await.unwrap();

        let count = fx
            .service
            .revoke_and_clear_device("d9", RevocationReason::Logout)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(fx.store.index_members(&device).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revocation_counts_security_event() {
        let fx = fixture();
        family(&fx, "f1", "u1", "d1").await;
        let counter = crate::metrics::SECURITY_EVENTS.with_label_values(&["FAMILY_REVOKED"]);
        let before = counter.get();

        fx.service.revoke("f1", RevocationReason::Admin).await.unwrap();
        assert!(counter.get() >= before + 1.0);
    }
}
