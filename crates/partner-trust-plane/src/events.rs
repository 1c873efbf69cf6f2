//! Event publication
//!
//! Trust and key lifecycle changes are announced as events so that
//! downstream consumers (authentication services, credential issuers) can
//! react. Revoking an issued API key is only *signalled* here; enforcement
//! belongs to the consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::RwLock;
use tracing::info;

/// Publisher name stamped on every event
pub const PUBLISHER: &str = "partner-trust-plane";

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    CaCertificateUploaded,
    PartnerCertificateUploaded,
    CertificateRevoked,
    ApikeyRequestSubmitted,
    ApikeyRequestDecided,
    ApikeyGenerated,
    ApikeyRevoked,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::CaCertificateUploaded => "CA_CERTIFICATE_UPLOADED",
            Topic::PartnerCertificateUploaded => "PARTNER_CERTIFICATE_UPLOADED",
            Topic::CertificateRevoked => "CERTIFICATE_REVOKED",
            Topic::ApikeyRequestSubmitted => "APIKEY_REQUEST_SUBMITTED",
            Topic::ApikeyRequestDecided => "APIKEY_REQUEST_DECIDED",
            Topic::ApikeyGenerated => "APIKEY_GENERATED",
            Topic::ApikeyRevoked => "APIKEY_REVOKED",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Envelope published to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct EventModel {
    pub publisher: String,
    pub topic: Topic,
    pub published_on: DateTime<Utc>,
    pub event: Event,
}

impl EventModel {
    pub fn new(topic: Topic, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            publisher: PUBLISHER.to_string(),
            topic,
            published_on: now,
            event: Event {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: now,
                data,
            },
        }
    }
}

/// Destination for published events
///
/// Implementations must be thread-safe; `publish` is called from request
/// handlers after the state change has been committed.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn publish(&self, event: EventModel);
}

/// Sink that writes each event as a structured log line
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: EventModel) {
        info!(
            topic = %event.topic,
            publisher = %event.publisher,
            event_id = %event.event.id,
            data = %event.event.data,
            "Published event"
        );
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: RwLock<Vec<EventModel>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, oldest first
    pub fn events(&self) -> Vec<EventModel> {
        self.events.read().unwrap().clone()
    }

    /// Topics of all events published so far, oldest first
    pub fn topics(&self) -> Vec<Topic> {
        self.events.read().unwrap().iter().map(|e| e.topic).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, event: EventModel) {
        self.events.write().unwrap().push(event);
    }
}
