//! Error taxonomy for the session credential lifecycle.
//!
//! Every public operation returns one of these typed outcomes so callers can
//! pick the right transport status without string matching.

use thiserror::Error;
use tonic::{Code, Status};

/// Outcome of a failed session operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No usable device identifier accompanied the request
    #[error("device identifier missing")]
    MissingDevice,

    /// Credential is malformed or its signature does not verify
    #[error("credential signature invalid")]
    InvalidSignature,

    /// Credential lifetime has elapsed
    #[error("credential expired")]
    Expired,

    /// Credential is bound to a different device
    #[error("credential bound to a different device")]
    DeviceMismatch,

    /// The token family has been revoked
    #[error("token family revoked")]
    FamilyRevoked,

    /// A superseded refresh token was presented again
    #[error("refresh token reuse detected, family revoked")]
    ReuseDetected,

    /// The family store could not be reached in time
    #[error("family store unavailable: {0}")]
    StoreUnavailable(String),

    /// Authorization code exchange failed
    #[error("identity provider error: {0}")]
    IdentityProvider(String),
}

impl AuthError {
    /// Stable error code for responses and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingDevice => MISSING_DEVICE,
            Self::InvalidSignature => INVALID_SIGNATURE,
            Self::Expired => EXPIRED,
            Self::DeviceMismatch => DEVICE_MISMATCH,
            Self::FamilyRevoked => FAMILY_REVOKED,
            Self::ReuseDetected => REUSE_DETECTED,
            Self::StoreUnavailable(_) => STORE_UNAVAILABLE,
            Self::IdentityProvider(_) => IDENTITY_PROVIDER_ERROR,
        }
    }

    /// HTTP status a gateway should answer with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::StoreUnavailable(_) => 503,
            Self::IdentityProvider(_) => 502,
            _ => 401,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        let code = match err {
            AuthError::StoreUnavailable(_) => Code::Unavailable,
            AuthError::IdentityProvider(_) => Code::FailedPrecondition,
            _ => Code::Unauthenticated,
        };
        // Internal detail stays in logs; callers only see the stable code.
        Status::new(code, err.code())
    }
}

/// Configuration error raised at startup.
#[derive(Error, Debug)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    /// Create a configuration error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// Error codes for gateway responses
/// Device identifier absent or empty.
pub const MISSING_DEVICE: &str = "MISSING_DEVICE";
/// Signature or format check failed.
pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
/// Credential expired.
pub const EXPIRED: &str = "EXPIRED";
/// Device binding mismatch.
pub const DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";
/// Family revoked.
pub const FAMILY_REVOKED: &str = "FAMILY_REVOKED";
/// Refresh token replay.
pub const REUSE_DETECTED: &str = "REUSE_DETECTED";
/// Store unreachable.
pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
/// Identity provider exchange failed.
pub const IDENTITY_PROVIDER_ERROR: &str = "IDENTITY_PROVIDER_ERROR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_are_unauthorized() {
        for err in [
            AuthError::MissingDevice,
            AuthError::InvalidSignature,
            AuthError::Expired,
            AuthError::DeviceMismatch,
            AuthError::FamilyRevoked,
            AuthError::ReuseDetected,
        ] {
            assert_eq!(err.http_status(), 401, "{}", err.code());
            assert!(!err.is_retryable());
            assert_eq!(Status::from(err).code(), Code::Unauthenticated);
        }
    }

    #[test]
    fn test_store_unavailable_maps_to_503() {
        let err = AuthError::StoreUnavailable("timeout".to_string());
        assert_eq!(err.http_status(), 503);
        assert!(err.is_retryable());
        assert_eq!(err.code(), "STORE_UNAVAILABLE");

        let status = Status::from(err);
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_identity_provider_code() {
        let err = AuthError::IdentityProvider("invalid_grant".to_string());
        assert_eq!(err.code(), IDENTITY_PROVIDER_ERROR);
        assert_eq!(err.http_status(), 502);
    }
}
