pub mod actors;
pub mod api;
pub mod collectors;
pub mod config;
pub mod probe;
pub mod settings;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Target;

/// Outcome of a single instrumented probe of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(rename = "pinged_url")]
    pub url: String,

    /// HTTP status of the final response, `0` when no response was obtained
    #[serde(rename = "ping_response_code")]
    pub status_code: u16,

    /// Transport error, or the reason phrase of a non-2xx response
    #[serde(rename = "ping_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "ping_response_times")]
    pub timings: ProbeTimings,

    #[serde(rename = "ping_time")]
    pub completed_at: DateTime<Utc>,

    #[serde(rename = "ping_certs", default)]
    pub certificates: Vec<CertificateInfo>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_page: String,
}

impl ProbeResult {
    /// Whether the probed page answered with a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Network phase timings in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTimings {
    pub dns: u64,
    pub tls_handshake: u64,
    pub connect: u64,
    pub first_response: u64,
}

/// One certificate of the chain presented by a TLS peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Leaf certificate the connection was verified against
    #[serde(rename = "cert_primary")]
    pub primary: bool,

    #[serde(rename = "cert_valid_from")]
    pub valid_from: DateTime<Utc>,

    #[serde(rename = "cert_valid_until")]
    pub valid_until: DateTime<Utc>,

    #[serde(rename = "cert_issuer")]
    pub issuer: String,

    #[serde(rename = "cert_subject")]
    pub subject: String,

    #[serde(rename = "cert_expired")]
    pub expired: bool,
}

/// A status change reported by one of the collectors or push ingresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub display_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_message: String,

    #[serde(rename = "pub_date")]
    pub published_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_page: String,
}

impl StatusUpdate {
    /// Build an update carrying the display context of `target`
    pub fn for_target(
        target: &Target,
        message: impl Into<String>,
        raw_message: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            display_name: target.name.clone(),
            display_domain: target.domain.clone(),
            message: message.into(),
            raw_message: raw_message.into(),
            published_at,
            status_page: target.status_page.clone(),
        }
    }
}

/// Canonical envelope delivered to the sink and the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned once at creation, stable across redeliveries
    #[serde(rename = "event_id")]
    pub id: Uuid,

    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Probe(ProbeResult),
    Status(StatusUpdate),
}

impl Event {
    pub fn probe(result: ProbeResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: EventPayload::Probe(result),
        }
    }

    pub fn status(update: StatusUpdate) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: EventPayload::Status(update),
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self.payload, EventPayload::Probe(_))
    }
}
