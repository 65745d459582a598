//! Family store over the platform `CacheClient`.
//!
//! Suitable for a single node and for tests. Records can be encrypted at
//! rest by configuring the client with an encryption key.

use super::{family_key, CasOutcome, FamilyIndex, FamilyStore, StoreError};
use crate::refresh::TokenFamily;
use async_trait::async_trait;
use chrono::Utc;
use rust_common::{CacheClient, SwapOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Storage implementation using platform CacheClient.
pub struct CacheFamilyStore {
    cache: Arc<CacheClient>,
}

impl CacheFamilyStore {
    /// Create new cache storage.
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FamilyStore for CacheFamilyStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, family_id: &str) -> Result<Option<TokenFamily>, StoreError> {
        match self.cache.get(&family_key(family_id)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, family), fields(family_id = %family.family_id), level = "debug")]
    async fn set(&self, family: &TokenFamily, ttl: Duration) -> Result<(), StoreError> {
        let value = serde_json::to_vec(family)?;
        self.cache
            .set(&family_key(&family.family_id), &value, Some(ttl))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, family), fields(version = family.version), level = "debug")]
    async fn compare_and_set(
        &self,
        family_id: &str,
        expected_version: u64,
        family: &TokenFamily,
    ) -> Result<CasOutcome, StoreError> {
        let key = family_key(family_id);
        let Some(current) = self.cache.get(&key).await? else {
            return Ok(CasOutcome::Missing);
        };

        let stored: TokenFamily = serde_json::from_slice(&current)?;
        if stored.version != expected_version {
            return Ok(CasOutcome::VersionConflict);
        }

        // Swap against the exact bytes read so an interleaved writer loses.
        let value = serde_json::to_vec(family)?;
        let ttl = family.remaining_ttl(Utc::now());
        let outcome = match self.cache.compare_and_swap(&key, &current, &value, Some(ttl)).await? {
            SwapOutcome::Swapped => CasOutcome::Applied,
            SwapOutcome::Changed => CasOutcome::VersionConflict,
            SwapOutcome::Missing => CasOutcome::Missing,
        };
        Ok(outcome)
    }

    async fn delete(&self, family_id: &str) -> Result<(), StoreError> {
        self.cache.delete(&family_key(family_id)).await;
        Ok(())
    }

    async fn add_to_index(&self, index: &FamilyIndex, family_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.cache.add_member(&index.key(), family_id, Some(ttl)).await;
        Ok(())
    }

    async fn remove_from_index(&self, index: &FamilyIndex, family_id: &str) -> Result<(), StoreError> {
        self.cache.remove_member(&index.key(), family_id).await;
        Ok(())
    }

    async fn index_members(&self, index: &FamilyIndex) -> Result<Vec<String>, StoreError> {
        Ok(self.cache.members(&index.key()).await)
    }
}
