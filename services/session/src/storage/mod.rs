//! Family store abstraction and backends.
//!
//! Every record lives under its family id. All mutation after creation goes
//! through [`FamilyStore::compare_and_set`] keyed on the record version; no
//! backend ever takes a distributed lock.

pub mod cache;
pub mod redis;

pub use cache::CacheFamilyStore;
pub use self::redis::RedisFamilyStore;

use crate::error::AuthError;
use crate::metrics;
use crate::refresh::TokenFamily;
use async_trait::async_trait;
use chrono::Utc;
use rust_common::PlatformError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

/// Family store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    /// Breaker refused the call
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Stored bytes did not decode
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shared platform client failed
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StoreUnavailable(err.to_string())
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Stored version matched; the record was replaced
    Applied,
    /// Stored version differed; nothing was written
    VersionConflict,
    /// No record exists
    Missing,
}

/// Secondary index over family ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyIndex {
    /// Families bound to a device
    Device(String),
    /// Families owned by a user
    User(String),
}

impl FamilyIndex {
    /// Backend key for this index.
    pub fn key(&self) -> String {
        match self {
            Self::Device(id) => format!("index:device:{id}"),
            Self::User(id) => format!("index:user:{id}"),
        }
    }
}

/// Key of a family record.
pub fn family_key(family_id: &str) -> String {
    format!("family:{family_id}")
}

/// Shared TTL-capable record store.
#[async_trait]
pub trait FamilyStore: Send + Sync {
    /// Load a family.
    async fn get(&self, family_id: &str) -> Result<Option<TokenFamily>, StoreError>;

    /// Write a family unconditionally.
    async fn set(&self, family: &TokenFamily, ttl: Duration) -> Result<(), StoreError>;

    /// Replace the family only if its stored version equals `expected_version`.
    ///
    /// The record keeps its remaining lifetime from `family.expires_at`.
    async fn compare_and_set(
        &self,
        family_id: &str,
        expected_version: u64,
        family: &TokenFamily,
    ) -> Result<CasOutcome, StoreError>;

    /// Remove a family.
    async fn delete(&self, family_id: &str) -> Result<(), StoreError>;

    /// Add a family id to an index, extending the index lifetime to `ttl`.
    async fn add_to_index(&self, index: &FamilyIndex, family_id: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Drop a family id from an index. Missing members are ignored.
    async fn remove_from_index(&self, index: &FamilyIndex, family_id: &str) -> Result<(), StoreError>;

    /// Family ids recorded under an index.
    async fn index_members(&self, index: &FamilyIndex) -> Result<Vec<String>, StoreError>;
}

/// Time-bounded, instrumented access to a [`FamilyStore`].
///
/// Every call is capped by the configured store timeout and failures surface
/// as [`AuthError::StoreUnavailable`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn FamilyStore>,
    timeout: Duration,
}

impl StoreHandle {
    /// Wrap `inner`, bounding every call by `timeout`.
    pub fn new(inner: Arc<dyn FamilyStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Load a family.
    pub async fn get(&self, family_id: &str) -> Result<Option<TokenFamily>, AuthError> {
        self.bounded("get", self.inner.get(family_id)).await
    }

    /// Persist a new family for its remaining lifetime.
    pub async fn create(&self, family: &TokenFamily) -> Result<(), AuthError> {
        let ttl = family.remaining_ttl(Utc::now());
        self.bounded("set", self.inner.set(family, ttl)).await
    }

    /// Conditionally replace a family; see [`FamilyStore::compare_and_set`].
    pub async fn compare_and_set(&self, expected_version: u64, family: &TokenFamily) -> Result<CasOutcome, AuthError> {
        self.bounded(
            "compare_and_set",
            self.inner.compare_and_set(&family.family_id, expected_version, family),
        )
        .await
    }

    /// Remove a family.
    pub async fn delete(&self, family_id: &str) -> Result<(), AuthError> {
        self.bounded("delete", self.inner.delete(family_id)).await
    }

    /// Index a family id.
    pub async fn add_to_index(&self, index: &FamilyIndex, family_id: &str, ttl: Duration) -> Result<(), AuthError> {
        self.bounded("add_to_index", self.inner.add_to_index(index, family_id, ttl))
            .await
    }

    /// Drop a family id from an index.
    pub async fn remove_from_index(&self, index: &FamilyIndex, family_id: &str) -> Result<(), AuthError> {
        self.bounded("remove_from_index", self.inner.remove_from_index(index, family_id))
            .await
    }

    /// Family ids under an index.
    pub async fn index_members(&self, index: &FamilyIndex) -> Result<Vec<String>, AuthError> {
        self.bounded("index_members", self.inner.index_members(index)).await
    }

    #[instrument(skip(self, fut), level = "debug")]
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                metrics::record_store_operation(operation, "ok");
                Ok(value)
            }
            Ok(Err(e)) => {
                metrics::record_store_operation(operation, "error");
                warn!(operation, error = %e, "family store call failed");
                Err(e.into())
            }
            Err(_) => {
                metrics::record_store_operation(operation, "timeout");
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "family store call timed out");
                Err(AuthError::StoreUnavailable(format!("{operation} timed out")))
            }
        }
    }
}
