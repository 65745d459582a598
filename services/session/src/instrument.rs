//! Uniform latency and outcome instrumentation for facade operations.

use crate::error::AuthError;
use crate::metrics;
use std::future::Future;
use std::time::Instant;
use tracing::{field, info_span, warn, Instrument};

/// Public operation being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Authorization code login
    Login,
    /// Refresh rotation
    Refresh,
    /// Access token validation
    Validate,
    /// Sign-out
    Logout,
    /// Operator revocation of a user
    RevokeUser,
    /// Revocation of a single family
    RevokeFamily,
}

impl Operation {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Refresh => "refresh",
            Self::Validate => "validate",
            Self::Logout => "logout",
            Self::RevokeUser => "revoke_user",
            Self::RevokeFamily => "revoke_family",
        }
    }
}

/// Run `fut` inside a span, recording its latency and outcome.
///
/// The outcome label is `ok` or the error's stable code.
pub async fn instrumented<T, F>(operation: Operation, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    let span = info_span!("session", operation = operation.as_str(), outcome = field::Empty);
    let started = Instant::now();
    let result = fut.instrument(span.clone()).await;
    let elapsed = started.elapsed().as_secs_f64();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    span.record("outcome", outcome);
    metrics::record_operation(operation.as_str(), outcome, elapsed);

    if let Err(e @ (AuthError::StoreUnavailable(_) | AuthError::IdentityProvider(_))) = &result {
        span.in_scope(|| warn!(error = %e, "dependency failure"));
    }
    result
}
