//! Security events emitted on breach signals and revocations.

use crate::refresh::RevocationReason;
use async_trait::async_trait;
use rust_common::{TelemetryClient, TelemetryEvent, TelemetrySeverity};
use tracing::warn;

/// Event published to the security sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A superseded refresh token was presented
    ReuseDetected {
        /// Affected family
        family_id: String,
        /// Family owner
        user_id: String,
        /// Device the family is bound to
        device_id: String,
        /// Device that presented the token
        presented_device_id: String,
    },
    /// A family moved to `Revoked`
    FamilyRevoked {
        /// Affected family
        family_id: String,
        /// Family owner
        user_id: String,
        /// Why it was revoked
        reason: RevocationReason,
    },
}

impl SecurityEvent {
    /// Event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ReuseDetected { .. } => "REUSE_DETECTED",
            Self::FamilyRevoked { .. } => "FAMILY_REVOKED",
        }
    }

    fn severity(&self) -> TelemetrySeverity {
        match self {
            Self::ReuseDetected { .. } => TelemetrySeverity::Critical,
            Self::FamilyRevoked {
                reason: RevocationReason::ReuseDetected | RevocationReason::BreachSignal,
                ..
            } => TelemetrySeverity::Warning,
            Self::FamilyRevoked { .. } => TelemetrySeverity::Info,
        }
    }

    fn into_telemetry(self, service_id: &str) -> TelemetryEvent {
        let event = TelemetryEvent::new(self.event_type(), self.severity(), service_id);
        match self {
            Self::ReuseDetected {
                family_id,
                user_id,
                device_id,
                presented_device_id,
            } => event
                .with_attribute("family_id", family_id)
                .with_attribute("user_id", user_id)
                .with_attribute("device_id", device_id)
                .with_attribute("presented_device_id", presented_device_id),
            Self::FamilyRevoked {
                family_id,
                user_id,
                reason,
            } => event
                .with_attribute("family_id", family_id)
                .with_attribute("user_id", user_id)
                .with_attribute("reason", reason.as_str()),
        }
    }
}

/// Fire-and-forget destination for security events.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    /// Publish an event. Delivery failures are the sink's concern.
    async fn emit(&self, event: SecurityEvent);
}

#[async_trait]
impl SecurityEventSink for TelemetryClient {
    async fn emit(&self, event: SecurityEvent) {
        if matches!(event, SecurityEvent::ReuseDetected { .. }) {
            warn!(event = ?event, "refresh token reuse detected");
        }
        self.record(event.into_telemetry(self.service_id())).await;
    }
}
