//! Redis-backed family store for multi-node deployments.
//!
//! Conditional writes run as a Lua script so the version check and the
//! write are atomic on the server. A circuit breaker sheds calls during a
//! hard outage so callers fail fast instead of waiting out every timeout.

use super::{family_key, CasOutcome, FamilyIndex, FamilyStore, StoreError};
use crate::refresh::TokenFamily;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, RedisResult, Script};
use async_trait::async_trait;
use chrono::Utc;
use rust_common::{CircuitBreaker, CircuitBreakerConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

// 1 = applied, 0 = version conflict, -1 = missing
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local record = cjson.decode(current)
if tonumber(record['version']) ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
";

/// Family store backed by a shared Redis deployment.
pub struct RedisFamilyStore {
    conn: ConnectionManager,
    breaker: CircuitBreaker,
    cas_script: Script,
    op_timeout: Duration,
}

impl RedisFamilyStore {
    /// Connect to Redis.
    ///
    /// `op_timeout` bounds each command so a hung server counts as a breaker
    /// failure. It must be shorter than the [`StoreHandle`](super::StoreHandle)
    /// bound wrapping this store, otherwise the outer timeout can drop the
    /// command before the failure is recorded.
    pub async fn connect(
        redis_url: &str,
        breaker: CircuitBreakerConfig,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        Ok(RedisFamilyStore {
            conn,
            breaker: CircuitBreaker::new("redis", breaker),
            cas_script: Script::new(CAS_SCRIPT),
            op_timeout,
        })
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        if !self.breaker.allow_request() {
            return Err(StoreError::CircuitOpen(self.breaker.name().to_string()));
        }

        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(unavailable(e))
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(StoreError::Unavailable("redis command timed out".to_string()))
            }
        }
    }
}

fn unavailable(e: ::redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl FamilyStore for RedisFamilyStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, family_id: &str) -> Result<Option<TokenFamily>, StoreError> {
        let key = family_key(family_id);
        let mut conn = self.conn.clone();
        let value: Option<String> = self.guarded(conn.get(&key)).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, family), fields(family_id = %family.family_id), level = "debug")]
    async fn set(&self, family: &TokenFamily, ttl: Duration) -> Result<(), StoreError> {
        let key = family_key(&family.family_id);
        let value = serde_json::to_string(family)?;
        let mut conn = self.conn.clone();
        let _: () = self.guarded(conn.pset_ex(&key, value, ttl_millis(ttl))).await?;
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
        let value = serde_json::to_string(family)?;
        let ttl = ttl_millis(family.remaining_ttl(Utc::now()));
        let mut conn = self.conn.clone();

        let code: i64 = self
            .guarded(async {
                self.cas_script
                    .key(&key)
                    .arg(expected_version)
                    .arg(&value)
                    .arg(ttl)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let outcome = match code {
            1 => CasOutcome::Applied,
            0 => CasOutcome::VersionConflict,
            _ => CasOutcome::Missing,
        };
        debug!(?outcome, "compare_and_set");
        Ok(outcome)
    }

    async fn delete(&self, family_id: &str) -> Result<(), StoreError> {
        let key = family_key(family_id);
        let mut conn = self.conn.clone();
        let _: () = self.guarded(conn.del(&key)).await?;
        Ok(())
    }

    async fn add_to_index(&self, index: &FamilyIndex, family_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = index.key();
        let ttl = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();

        let _: () = self
            .guarded(
                ::redis::pipe()
                    .atomic()
                    .sadd(&key, family_id)
                    .ignore()
                    .pexpire(&key, ttl)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn remove_from_index(&self, index: &FamilyIndex, family_id: &str) -> Result<(), StoreError> {
        let key = index.key();
        let mut conn = self.conn.clone();
        let _: () = self.guarded(conn.srem(&key, family_id)).await?;
        Ok(())
    }

    async fn index_members(&self, index: &FamilyIndex) -> Result<Vec<String>, StoreError> {
        let key = index.key();
        let mut conn = self.conn.clone();
        let ids: Vec<String> = self.guarded(conn.smembers(&key)).await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2_000);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisFamilyStore::connect(
            "not-a-redis-url",
            CircuitBreakerConfig::default(),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
