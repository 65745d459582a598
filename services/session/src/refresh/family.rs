//! Token family record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a family. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyStatus {
    /// Rotations and validations may succeed
    Active,
    /// Nothing issued from this family is accepted
    Revoked,
}

/// Why a family was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// User signed out
    Logout,
    /// A superseded refresh token was replayed
    ReuseDetected,
    /// Operator action
    Admin,
    /// Upstream breach signal
    BreachSignal,
}

impl RevocationReason {
    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::ReuseDetected => "reuse_detected",
            Self::Admin => "admin",
            Self::BreachSignal => "breach_signal",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side record of one login session on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFamily {
    /// Family identifier, also the prefix of every refresh token
    pub family_id: String,
    /// Owning user
    pub user_id: String,
    /// Device the family is bound to
    pub device_id: String,
    /// SHA-256 of the only refresh token currently accepted
    pub current_refresh_ref: String,
    /// SHA-256 of the token it replaced
    pub previous_refresh_ref: Option<String>,
    /// Bumped on every rotation and on revocation
    pub version: u64,
    /// Login time
    pub created_at: DateTime<Utc>,
    /// Last rotation, or login time
    pub last_rotation_at: DateTime<Utc>,
    /// End of the refresh lifetime
    pub expires_at: DateTime<Utc>,
    /// Active or revoked
    pub status: FamilyStatus,
    /// When it was revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why it was revoked
    pub revocation_reason: Option<RevocationReason>,
}

impl TokenFamily {
    /// Open a family at version 0 for `lifetime`.
    pub fn new(
        family_id: String,
        user_id: String,
        device_id: String,
        refresh_ref: String,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::days(36_500));
        TokenFamily {
            family_id,
            user_id,
            device_id,
            current_refresh_ref: refresh_ref,
            previous_refresh_ref: None,
            version: 0,
            created_at: now,
            last_rotation_at: now,
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            status: FamilyStatus::Active,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    /// Successor record after rotating to `new_ref`.
    #[must_use]
    pub fn rotated(&self, new_ref: String) -> Self {
        let mut next = self.clone();
        next.previous_refresh_ref = Some(std::mem::replace(&mut next.current_refresh_ref, new_ref));
        next.version += 1;
        next.last_rotation_at = Utc::now().max(self.last_rotation_at);
        next
    }

    /// Successor record after revocation.
    #[must_use]
    pub fn revoked(&self, reason: RevocationReason) -> Self {
        let mut next = self.clone();
        next.status = FamilyStatus::Revoked;
        next.revoked_at = Some(Utc::now());
        next.revocation_reason = Some(reason);
        next.version += 1;
        next
    }

    pub fn is_revoked(&self) -> bool {
        self.status == FamilyStatus::Revoked
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time the store should keep this record.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}
