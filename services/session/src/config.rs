//! Centralized configuration for the session service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. Platform library configurations are included.

use crate::error::ConfigError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use rust_common::{CacheClientConfig, CircuitBreakerConfig, TelemetryClientConfig, TracingConfig};
use std::env;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Minimum accepted length for HMAC keys.
pub const MIN_KEY_LEN: usize = 32;

/// Longest access-token lifetime the service will mint.
pub const MAX_ACCESS_TTL: Duration = Duration::from_secs(3600);

const SERVICE_NAME: &str = "session-service";

/// Key material that is wiped on drop and never printed.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is shorter than [`MIN_KEY_LEN`].
    pub fn new(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() < MIN_KEY_LEN {
            return Err(ConfigError::new(format!(
                "key must be at least {MIN_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Generate a random 32-byte key.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; MIN_KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Family store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process cache; single node and tests
    Memory,
    /// Shared Redis deployment
    Redis {
        /// Connection URL
        url: String,
    },
}

/// Session service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // JWT settings
    /// `iss` claim stamped on and required from access tokens
    pub jwt_issuer: String,
    /// `aud` claim stamped on and required from access tokens
    pub jwt_audience: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token (family) lifetime
    pub refresh_token_ttl: Duration,

    // Validation cache
    /// Status cache TTL is the access TTL divided by this
    pub status_cache_divisor: u32,
    /// Maximum cached family statuses per process
    pub status_cache_capacity: usize,

    // Dependencies
    /// Bound on every family store call
    pub store_timeout: Duration,
    /// Bound on the authorization code exchange
    pub identity_timeout: Duration,
    /// Identity provider token exchange URL
    pub identity_exchange_url: Option<String>,
    /// Family store backend
    pub store_backend: StoreBackend,

    // Keys
    /// HS256 key for access tokens
    pub signing_key: SecretKey,
    /// HMAC key for deriving rotated refresh secrets
    pub rotation_key: SecretKey,

    // Platform integration
    /// In-process cache configuration for the memory backend
    pub cache: CacheClientConfig,
    /// Breaker for the Redis backend
    pub circuit_breaker: CircuitBreakerConfig,
    /// Security event shipping
    pub telemetry: TelemetryClientConfig,
    /// Log output
    pub tracing: TracingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or violates a bound.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "auth-platform".to_string());
        let jwt_audience = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "session".to_string());
        let access_token_ttl = Duration::from_secs(parse_env("ACCESS_TOKEN_TTL", 900)?);
        let refresh_token_ttl = Duration::from_secs(parse_env("REFRESH_TOKEN_TTL", 604_800)?);

        let status_cache_divisor = parse_env("STATUS_CACHE_DIVISOR", 10)?;
        let status_cache_capacity = parse_env("STATUS_CACHE_CAPACITY", 10_000)?;

        let store_timeout = Duration::from_millis(parse_env("STORE_TIMEOUT_MS", 2_000)?);
        let identity_timeout = Duration::from_millis(parse_env("IDENTITY_TIMEOUT_MS", 5_000)?);
        let identity_exchange_url = match env::var("IDENTITY_EXCHANGE_URL") {
            Ok(raw) => {
                let parsed = url::Url::parse(&raw)
                    .map_err(|e| ConfigError::new(format!("Invalid IDENTITY_EXCHANGE_URL: {e}")))?;
                Some(parsed.to_string())
            }
            Err(_) => None,
        };

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            other => return Err(ConfigError::new(format!("Invalid STORE_BACKEND: {other}"))),
        };

        let signing_key = parse_key("SIGNING_KEY")?;
        let rotation_key = parse_key("ROTATION_KEY")?;

        let cache = CacheClientConfig::default()
            .with_namespace("session")
            .with_default_ttl(refresh_token_ttl)
            .with_max_entries(parse_env("CACHE_MAX_ENTRIES", 100_000)?);

        let circuit_breaker = CircuitBreakerConfig::default()
            .with_failure_threshold(parse_env("CB_FAILURE_THRESHOLD", 5)?)
            .with_success_threshold(parse_env("CB_SUCCESS_THRESHOLD", 2)?)
            .with_open_timeout(Duration::from_secs(parse_env("CB_TIMEOUT", 30)?));

        let mut telemetry = TelemetryClientConfig::default().with_service_id(SERVICE_NAME);
        if let Ok(endpoint) = env::var("TELEMETRY_ENDPOINT") {
            telemetry = telemetry.with_endpoint(endpoint);
        }

        let tracing = TracingConfig::default()
            .with_service_name(SERVICE_NAME)
            .with_log_level(env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
            .with_json_output(parse_env("LOG_JSON", false)?);

        let config = Self {
            jwt_issuer,
            jwt_audience,
            access_token_ttl,
            refresh_token_ttl,
            status_cache_divisor,
            status_cache_capacity,
            store_timeout,
            identity_timeout,
            identity_exchange_url,
            store_backend,
            signing_key,
            rotation_key,
            cache,
            circuit_breaker,
            telemetry,
            tracing,
        };
        config.validate()?;
        Ok(config)
    }

    /// In-memory configuration with fresh random keys.
    #[must_use]
    pub fn ephemeral() -> Self {
        let refresh_token_ttl = Duration::from_secs(604_800);
        Self {
            jwt_issuer: "auth-platform".to_string(),
            jwt_audience: "session".to_string(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl,
            status_cache_divisor: 10,
            status_cache_capacity: 10_000,
            store_timeout: Duration::from_secs(2),
            identity_timeout: Duration::from_secs(5),
            identity_exchange_url: None,
            store_backend: StoreBackend::Memory,
            signing_key: SecretKey::random(),
            rotation_key: SecretKey::random(),
            cache: CacheClientConfig::default()
                .with_namespace("session")
                .with_default_ttl(refresh_token_ttl),
            circuit_breaker: CircuitBreakerConfig::default(),
            telemetry: TelemetryClientConfig::default().with_service_id(SERVICE_NAME),
            tracing: TracingConfig::default().with_service_name(SERVICE_NAME),
        }
    }

    /// Set the access token lifetime.
    #[must_use]
    pub const fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    /// Set the refresh token lifetime.
    #[must_use]
    pub const fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Set the store call bound.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the identity exchange bound.
    #[must_use]
    pub const fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Time-to-live of a cached family status.
    #[must_use]
    pub fn status_cache_ttl(&self) -> Duration {
        self.access_token_ttl / self.status_cache_divisor.max(2)
    }

    /// Per-command bound for a store backend with its own breaker.
    ///
    /// Strictly shorter than `store_timeout` so the backend observes its own
    /// timeout and records the failure before the outer bound drops the call.
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        let bound = self.store_timeout * 9 / 10;
        let floor = self.store_timeout.saturating_sub(Duration::from_millis(5));
        bound.min(floor).max(Duration::from_millis(1))
    }

    /// Check cross-field bounds.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_ttl.is_zero() || self.access_token_ttl > MAX_ACCESS_TTL {
            return Err(ConfigError::new("ACCESS_TOKEN_TTL must be between 1 and 3600 seconds"));
        }
        if self.refresh_token_ttl <= self.access_token_ttl {
            return Err(ConfigError::new("REFRESH_TOKEN_TTL must exceed ACCESS_TOKEN_TTL"));
        }
        if self.status_cache_divisor < 2 {
            return Err(ConfigError::new("STATUS_CACHE_DIVISOR must be at least 2"));
        }
        if self.status_cache_capacity == 0 {
            return Err(ConfigError::new("STATUS_CACHE_CAPACITY must be positive"));
        }
        if self.store_timeout.is_zero() || self.identity_timeout.is_zero() {
            return Err(ConfigError::new("timeouts must be positive"));
        }
        if self.jwt_issuer.is_empty() || self.jwt_audience.is_empty() {
            return Err(ConfigError::new("JWT_ISSUER and JWT_AUDIENCE must be set"));
        }
        Ok(())
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| ConfigError::new(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a base64 key from the environment.
fn parse_key(name: &str) -> Result<SecretKey, ConfigError> {
    match env::var(name) {
        Ok(encoded) => {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ConfigError::new(format!("Invalid {name}: {e}")))?;
            SecretKey::new(bytes).map_err(|e| ConfigError::new(format!("{name}: {}", e.0)))
        }
        Err(_) => {
            // Generate random key for development
            tracing::warn!(key = name, "no key configured, generating an ephemeral one");
            Ok(SecretKey::random())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_is_valid() {
        let config = Config::ephemeral();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.status_cache_ttl(), Duration::from_secs(90));
    }

    #[test]
    fn test_status_cache_ttl_shorter_than_access_ttl() {
        let config = Config::ephemeral().with_access_token_ttl(Duration::from_secs(60));
        assert!(config.status_cache_ttl() < config.access_token_ttl);
    }

    #[test]
    fn test_backend_timeout_shorter_than_store_timeout() {
        for (store_ms, backend_ms) in [(2_000, 1_800), (100, 90), (20, 15)] {
            let config = Config::ephemeral().with_store_timeout(Duration::from_millis(store_ms));
            assert_eq!(config.backend_timeout(), Duration::from_millis(backend_ms));
            assert!(config.backend_timeout() < config.store_timeout);
        }
    }

    #[test]
    fn test_access_ttl_bound() {
        let config = Config::ephemeral().with_access_token_ttl(Duration::from_secs(7200));
        assert!(config.validate().is_err());

        let config = Config::ephemeral().with_access_token_ttl(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let config = Config::ephemeral()
            .with_access_token_ttl(Duration::from_secs(900))
            .with_refresh_token_ttl(Duration::from_secs(600));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(SecretKey::new(vec![1u8; 16]).is_err());
        assert!(SecretKey::new(vec![1u8; 32]).is_ok());
    }

    #[test]
    fn test_secret_key_debug_redacted() {
        let key = SecretKey::new(vec![0x41; 32]).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("65"));
    }

    #[test]
    fn test_parse_env_default() {
        let value: u64 = parse_env("SESSION_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
