//! Device identity anchoring every credential pair.

use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Longest accepted device identifier, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Validated device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// Opaque client-chosen identifier
    pub device_id: String,
    /// Digest of the client fingerprint, if one was supplied
    pub fingerprint: Option<String>,
    /// When the device last completed a login
    pub last_authenticated_at: DateTime<Utc>,
}

/// Derives and checks device bindings. Pure, no I/O.
pub struct DeviceBinder;

impl DeviceBinder {
    /// Build a [`DeviceContext`] from caller input.
    ///
    /// The fingerprint is stored as a SHA-256 digest so raw client
    /// fingerprints never reach the store.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingDevice`] when the identifier is absent or
    /// unusable.
    pub fn bind(device_id: Option<&str>, fingerprint: Option<&str>) -> Result<DeviceContext, AuthError> {
        let device_id = Self::require(device_id.unwrap_or_default())?;
        let fingerprint = fingerprint
            .filter(|f| !f.trim().is_empty())
            .map(|f| URL_SAFE_NO_PAD.encode(Sha256::digest(f.as_bytes())));

        Ok(DeviceContext {
            device_id: device_id.to_string(),
            fingerprint,
            last_authenticated_at: Utc::now(),
        })
    }

    /// Validate a presented device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingDevice`] for empty, whitespace-only,
    /// oversized or control-character identifiers.
    pub fn require(device_id: &str) -> Result<&str, AuthError> {
        if device_id.trim().is_empty()
            || device_id.len() > MAX_DEVICE_ID_LEN
            || device_id.chars().any(char::is_control)
        {
            return Err(AuthError::MissingDevice);
        }
        Ok(device_id)
    }

    /// Check that `presented` is the device a credential was bound to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DeviceMismatch`] when they differ.
    pub fn ensure_bound(expected: &str, presented: &str) -> Result<(), AuthError> {
        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::DeviceMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_valid_device() {
        let ctx = DeviceBinder::bind(Some("dev1"), Some("fp")).unwrap();
        assert_eq!(ctx.device_id, "dev1");
        let fingerprint = ctx.fingerprint.unwrap();
        assert_ne!(fingerprint, "fp");
        assert_eq!(fingerprint.len(), 43);
    }

    #[test]
    fn test_bind_without_fingerprint() {
        let ctx = DeviceBinder::bind(Some("dev1"), None).unwrap();
        assert!(ctx.fingerprint.is_none());

        let ctx = DeviceBinder::bind(Some("dev1"), Some("  ")).unwrap();
        assert!(ctx.fingerprint.is_none());
    }

    #[test]
    fn test_missing_device_rejected() {
        for bad in [None, Some(""), Some("   "), Some("\t\n")] {
            assert_eq!(DeviceBinder::bind(bad, None), Err(AuthError::MissingDevice));
        }
    }

    #[test]
    fn test_oversized_and_control_rejected() {
        let long = "d".repeat(MAX_DEVICE_ID_LEN + 1);
        assert_eq!(DeviceBinder::require(&long), Err(AuthError::MissingDevice));
        assert_eq!(DeviceBinder::require("dev\u{0}1"), Err(AuthError::MissingDevice));

        let max = "d".repeat(MAX_DEVICE_ID_LEN);
        assert!(DeviceBinder::require(&max).is_ok());
    }

    #[test]
    fn test_ensure_bound() {
        assert!(DeviceBinder::ensure_bound("dev1", "dev1").is_ok());
        assert_eq!(
            DeviceBinder::ensure_bound("dev1", "dev2"),
            Err(AuthError::DeviceMismatch)
        );
        assert_eq!(
            DeviceBinder::ensure_bound("dev1", "dev10"),
            Err(AuthError::DeviceMismatch)
        );
    }
}
