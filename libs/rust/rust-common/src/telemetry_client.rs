//! Client for the platform's security telemetry collector.
//!
//! Events are buffered and shipped in JSON batches over HTTP. Critical
//! events flush immediately. When the collector is unreachable, or no
//! endpoint is configured, batches are written to local `tracing` output
//! instead so the signal is never silently lost.

use crate::{build_http_client, CircuitBreaker, CircuitBreakerConfig, HttpConfig, PlatformError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Severity attached to a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySeverity {
    /// Routine lifecycle signal
    Info,
    /// Suspicious but contained
    Warning,
    /// Breach signal; flushed immediately
    Critical,
}

impl TelemetrySeverity {
    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A single security event.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// Event type, e.g. `REUSE_DETECTED`
    pub event_type: String,
    /// Severity
    pub severity: TelemetrySeverity,
    /// Emitting service
    pub service_id: String,
    /// Structured attributes
    pub attributes: BTreeMap<String, String>,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        severity: TelemetrySeverity,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            service_id: service_id.into(),
            attributes: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize)]
struct Batch<'a> {
    events: &'a [TelemetryEvent],
}

/// Telemetry client configuration.
#[derive(Debug, Clone)]
pub struct TelemetryClientConfig {
    /// Collector URL; `None` keeps everything local
    pub endpoint: Option<String>,
    /// Events buffered before an automatic flush
    pub batch_size: usize,
    /// Maximum buffered events; newer events are dropped beyond this
    pub buffer_size: usize,
    /// Service identifier stamped on events
    pub service_id: String,
    /// Breaker guarding the collector
    pub circuit_breaker: CircuitBreakerConfig,
    /// HTTP settings for the collector
    pub http: HttpConfig,
}

impl Default for TelemetryClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_size: 50,
            buffer_size: 5_000,
            service_id: "rust-service".to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl TelemetryClientConfig {
    /// Set the collector endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the service ID.
    #[must_use]
    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// Buffered telemetry shipper.
pub struct TelemetryClient {
    config: TelemetryClientConfig,
    buffer: Mutex<VecDeque<TelemetryEvent>>,
    breaker: CircuitBreaker,
    http: reqwest::Client,
}

impl TelemetryClient {
    /// Create a new telemetry client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TelemetryClientConfig) -> Result<Self, PlatformError> {
        let http = build_http_client(&config.http)?;
        Ok(Self {
            breaker: CircuitBreaker::new("telemetry", config.circuit_breaker.clone()),
            buffer: Mutex::new(VecDeque::with_capacity(config.batch_size)),
            http,
            config,
        })
    }

    /// Service identifier stamped on events.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.config.service_id
    }

    /// Buffer an event, flushing when the batch is full or the event is critical.
    pub async fn record(&self, event: TelemetryEvent) {
        let critical = event.severity == TelemetrySeverity::Critical;
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            if buffer.len() < self.config.buffer_size {
                buffer.push_back(event);
            } else {
                warn!(event_type = %event.event_type, "telemetry buffer full, dropping event");
            }
            critical || buffer.len() >= self.config.batch_size
        };

        if should_flush {
            if let Err(e) = self.flush().await {
                warn!(error = %e, "telemetry flush failed");
            }
        }
    }

    /// Ship all buffered events.
    ///
    /// Returns the number of events delivered to the collector. Events that
    /// could not be delivered are written to local tracing output.
    ///
    /// # Errors
    ///
    /// Returns an error when the collector is unreachable or rejects the batch.
    pub async fn flush(&self) -> Result<usize, PlatformError> {
        let events: Vec<TelemetryEvent> = self.buffer.lock().await.drain(..).collect();
        if events.is_empty() {
            return Ok(0);
        }

        let Some(endpoint) = self.config.endpoint.as_deref() else {
            Self::emit_locally(&events);
            return Ok(0);
        };

        if !self.breaker.allow_request() {
            Self::emit_locally(&events);
            return Err(PlatformError::circuit_open(self.breaker.name()));
        }

        let sent = self
            .http
            .post(endpoint)
            .json(&Batch { events: &events })
            .send()
            .await;

        match sent {
            Ok(response) if response.status().is_success() => {
                self.breaker.record_success();
                Ok(events.len())
            }
            Ok(response) => {
                self.breaker.record_failure();
                Self::emit_locally(&events);
                Err(PlatformError::Rejected(format!(
                    "collector returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.breaker.record_failure();
                Self::emit_locally(&events);
                Err(PlatformError::Http(e))
            }
        }
    }

    /// Number of buffered events.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    fn emit_locally(events: &[TelemetryEvent]) {
        for event in events {
            let attributes = serde_json::to_string(&event.attributes).unwrap_or_default();
            match event.severity {
                TelemetrySeverity::Info => info!(
                    event_type = %event.event_type,
                    service = %event.service_id,
                    attributes = %attributes,
                    "security event"
                ),
                TelemetrySeverity::Warning | TelemetrySeverity::Critical => warn!(
                    event_type = %event.event_type,
                    severity = event.severity.as_str(),
                    service = %event.service_id,
                    attributes = %attributes,
                    "security event"
                ),
            }
        }
    }
}
