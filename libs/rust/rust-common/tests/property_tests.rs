//! Property-based tests for rust-common crate.
//!
//! These tests verify universal properties across all inputs using proptest.

use proptest::prelude::*;
use rust_common::{
    CacheClient, CacheClientConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, PlatformError,
    SwapOutcome,
};
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_retryable_errors_are_consistent(msg in "[a-zA-Z0-9 ]{1,50}") {
        let retryable = [
            PlatformError::Unavailable(msg.clone()),
            PlatformError::Timeout(msg.clone()),
            PlatformError::circuit_open(msg.clone()),
        ];
        for err in &retryable {
            prop_assert!(err.is_retryable(), "Error should be retryable: {:?}", err);
        }

        let permanent = [
            PlatformError::Rejected(msg.clone()),
            PlatformError::InvalidInput(msg.clone()),
            PlatformError::Encryption(msg),
        ];
        for err in &permanent {
            prop_assert!(!err.is_retryable(), "Error should not be retryable: {:?}", err);
        }
    }

    #[test]
    fn prop_circuit_breaker_opens_after_threshold(threshold in 1u32..10) {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_open_timeout(Duration::from_secs(60)),
        );

        for _ in 0..threshold - 1 {
            breaker.record_failure();
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        prop_assert_eq!(breaker.state(), CircuitState::Open);
        prop_assert!(!breaker.allow_request());
    }

    #[test]
    fn prop_circuit_breaker_closes_after_successes(success_threshold in 1u32..4) {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(success_threshold)
                .with_open_timeout(Duration::ZERO),
        );

        breaker.record_failure();
        prop_assert!(breaker.allow_request());
        prop_assert_eq!(breaker.state(), CircuitState::HalfOpen);

        for _ in 0..success_threshold {
            breaker.record_success();
        }
        prop_assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn prop_success_resets_failure_count(threshold in 2u32..10) {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_failure_threshold(threshold),
        );

        for _ in 0..3 {
            for _ in 0..threshold - 1 {
                breaker.record_failure();
            }
            breaker.record_success();
        }
        prop_assert_eq!(breaker.state(), CircuitState::Closed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_cache_namespace_isolation(
        ns1 in "[a-z]{3,10}",
        ns2 in "[a-z]{3,10}",
        key in "[a-z]{1,20}",
        value in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        prop_assume!(ns1 != ns2);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let a = CacheClient::new(CacheClientConfig::default().with_namespace(&ns1));
            let b = CacheClient::new(CacheClientConfig::default().with_namespace(&ns2));

            a.set(&key, &value, None).await.unwrap();
            prop_assert_eq!(a.get(&key).await.unwrap(), Some(value.clone()));
            prop_assert_eq!(b.get(&key).await.unwrap(), None);
            Ok(())
        })?;
    }

    #[test]
    fn prop_compare_and_swap_single_winner(
        original in prop::collection::vec(any::<u8>(), 1..64),
        first in prop::collection::vec(any::<u8>(), 1..64),
        second in prop::collection::vec(any::<u8>(), 1..64),
        encrypted in any::<bool>(),
    ) {
        prop_assume!(first != original);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut config = CacheClientConfig::default().with_namespace("cas");
            if encrypted {
                config = config.with_encryption_key([7u8; 32]);
            }
            let cache = CacheClient::new(config);
            cache.set("record", &original, None).await.unwrap();

            let won = cache.compare_and_swap("record", &original, &first, None).await.unwrap();
            let lost = cache.compare_and_swap("record", &original, &second, None).await.unwrap();

            prop_assert_eq!(won, SwapOutcome::Swapped);
            prop_assert_eq!(lost, SwapOutcome::Changed);
            prop_assert_eq!(cache.get("record").await.unwrap(), Some(first));
            Ok(())
        })?;
    }

    #[test]
    fn prop_members_accumulate(members in prop::collection::btree_set("[a-z0-9]{4,12}", 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let cache = CacheClient::new(CacheClientConfig::default());
            for member in &members {
                cache.add_member("index", member, None).await;
            }
            let stored: std::collections::BTreeSet<String> = cache.members("index").await.into_iter().collect();
            prop_assert_eq!(stored, members);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_cache_ttl_enforcement() {
    let cache = CacheClient::new(CacheClientConfig::default());
    cache.set("short", b"v", Some(Duration::from_millis(30))).await.unwrap();
    assert!(cache.exists("short").await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!cache.exists("short").await);
    assert_eq!(
        cache.compare_and_swap("short", b"v", b"w", None).await.unwrap(),
        SwapOutcome::Missing
    );
}
