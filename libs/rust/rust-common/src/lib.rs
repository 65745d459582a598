//! Shared library for cross-cutting concerns in auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - HTTP client configuration and building
//! - Circuit breaker pattern for resilience
//! - Versioned, TTL-aware cache client with compare-and-swap
//! - Security telemetry client with batching and local fallback
//! - Tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache_client;
pub mod circuit_breaker;
pub mod error;
pub mod http;
pub mod telemetry_client;
pub mod tracing_config;

pub use cache_client::{CacheClient, CacheClientConfig, SwapOutcome};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::PlatformError;
pub use http::{build_http_client, HttpConfig};
pub use telemetry_client::{TelemetryClient, TelemetryClientConfig, TelemetryEvent, TelemetrySeverity};
pub use tracing_config::{init_tracing, TracingConfig};
