//! External identity provider integration.
//!
//! The session service never sees credentials; it only trades a one-time
//! authorization code for verified identity claims.

use crate::error::AuthError;
use async_trait::async_trait;
use rust_common::{build_http_client, HttpConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Verified identity returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable subject identifier
    #[serde(alias = "sub")]
    pub user_id: String,
    /// Email, when the provider shares it
    #[serde(default)]
    pub email: Option<String>,
    /// Additional provider claims
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
}

/// Authorization code exchange failure.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No exchange endpoint configured
    #[error("identity provider not configured")]
    NotConfigured,

    /// Provider refused the code
    #[error("identity provider rejected the code with status {0}")]
    Rejected(u16),

    /// Provider answered with something unusable
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),

    /// Transport failure
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        AuthError::IdentityProvider(err.to_string())
    }
}

/// Exchanges authorization codes for identity claims.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Trade a one-time code for verified claims.
    async fn exchange(&self, auth_code: &str) -> Result<IdentityClaims, IdentityError>;
}

/// Identity provider reached over HTTP.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    exchange_url: String,
}

impl HttpIdentityProvider {
    /// Create a provider posting to `exchange_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(exchange_url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let http = build_http_client(&HttpConfig::default().with_timeout(timeout))?;
        Ok(Self {
            http,
            exchange_url: exchange_url.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all)]
    async fn exchange(&self, auth_code: &str) -> Result<IdentityClaims, IdentityError> {
        let response = self
            .http
            .post(&self.exchange_url)
            .form(&[("grant_type", "authorization_code"), ("code", auth_code)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "authorization code exchange rejected");
            return Err(IdentityError::Rejected(status.as_u16()));
        }

        let claims: IdentityClaims = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;

        if claims.user_id.trim().is_empty() {
            return Err(IdentityError::InvalidResponse("empty subject".to_string()));
        }

        debug!(user_id = %claims.user_id, "authorization code exchanged");
        Ok(claims)
    }
}

/// Provider used when no exchange endpoint is configured; refuses every code.
pub struct UnconfiguredIdentityProvider;

#[async_trait]
impl IdentityProvider for UnconfiguredIdentityProvider {
    async fn exchange(&self, _auth_code: &str) -> Result<IdentityClaims, IdentityError> {
        Err(IdentityError::NotConfigured)
    }
}
