//! Shared fixtures for session service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_common::{CacheClient, CacheClientConfig};
use session_service::identity::IdentityError;
use session_service::storage::{CacheFamilyStore, CasOutcome, FamilyIndex, FamilyStore, StoreError};
use session_service::{
    Config, IdentityClaims, IdentityProvider, SecurityEvent, SecurityEventSink, SessionService, TokenFamily,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identity provider that accepts any code not starting with `bad`.
///
/// `code-abc` resolves to user `user-abc`.
pub struct StaticIdentityProvider;

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn exchange(&self, auth_code: &str) -> Result<IdentityClaims, IdentityError> {
        if auth_code.starts_with("bad") {
            return Err(IdentityError::Rejected(400));
        }
        let user_id = auth_code.strip_prefix("code-").unwrap_or(auth_code);
        Ok(IdentityClaims {
            user_id: format!("user-{user_id}"),
            email: None,
            claims: HashMap::new(),
        })
    }
}

/// Sink keeping every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl SecurityEventSink for RecordingSink {
    async fn emit(&self, event: SecurityEvent) {
        self.events.lock().push(event);
    }
}

/// Cache-backed store with switchable outage and read interleaving.
pub struct FlakyStore {
    inner: CacheFamilyStore,
    down: AtomicBool,
    yield_after_read: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        let namespace = format!("session-test-{}", uuid::Uuid::new_v4());
        Self {
            inner: CacheFamilyStore::new(Arc::new(CacheClient::new(
                CacheClientConfig::default().with_namespace(namespace),
            ))),
            down: AtomicBool::new(false),
            yield_after_read: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Yield to the scheduler after every read so concurrent callers interleave.
    pub fn set_yield_after_read(&self, enabled: bool) {
        self.yield_after_read.store(enabled, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FamilyStore for FlakyStore {
    async fn get(&self, family_id: &str) -> Result<Option<TokenFamily>, StoreError> {
        self.check()?;
        let family = self.inner.get(family_id).await?;
        if self.yield_after_read.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(family)
    }

    async fn set(&self, family: &TokenFamily, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(family, ttl).await
    }

    async fn compare_and_set(
        &self,
        family_id: &str,
        expected_version: u64,
        family: &TokenFamily,
    ) -> Result<CasOutcome, StoreError> {
        self.check()?;
        self.inner.compare_and_set(family_id, expected_version, family).await
    }

    async fn delete(&self, family_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(family_id).await
    }

    async fn add_to_index(&self, index: &FamilyIndex, family_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.add_to_index(index, family_id, ttl).await
    }

    async fn remove_from_index(&self, index: &FamilyIndex, family_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove_from_index(index, family_id).await
    }

    async fn index_members(&self, index: &FamilyIndex) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.index_members(index).await
    }
}

pub struct Harness {
    pub service: SessionService,
    pub store: Arc<FlakyStore>,
    pub events: Arc<RecordingSink>,
}

pub async fn harness() -> Harness {
    harness_with(Config::ephemeral()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let store = Arc::new(FlakyStore::new());
    let events = Arc::new(RecordingSink::default());
    let service = service_over(config, store.clone(), events.clone()).await;
    Harness { service, store, events }
}

/// Build a service over an existing store, e.g. a second process sharing it.
pub async fn service_over(config: Config, store: Arc<FlakyStore>, events: Arc<RecordingSink>) -> SessionService {
    SessionService::builder(config)
        .with_store(store)
        .with_identity_provider(Arc::new(StaticIdentityProvider))
        .with_event_sink(events)
        .build()
        .await
        .unwrap()
}
