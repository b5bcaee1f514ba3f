//! The JSON wire envelope POSTed to destinations.

use chrono::{DateTime, Utc};
use courier_core::ActivityEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// JSON body of every outbound webhook request.
///
/// Field names and presence rules are a wire contract: receivers verify
/// signatures over the exact serialized bytes and parse these fields, so
/// renaming or reordering fields is a breaking change. Optional fields are
/// omitted entirely when absent rather than sent as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event identifier, stable across redeliveries of the same event.
    pub id: Uuid,

    /// Event type string, e.g. `agent.installed`.
    pub event_type: String,

    /// Broad event category.
    pub event_category: String,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// Owning organization.
    pub org_id: Uuid,

    /// Related employee, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<Uuid>,

    /// Originating session, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_session_id: Option<Uuid>,

    /// Reporting client name, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Reporting client version, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,

    /// Human-readable summary. Always present, empty string when the
    /// event carries none.
    pub content: String,

    /// Structured payload. Always present, `null` when the event carries
    /// none.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Builds the envelope for an activity event.
    pub fn from_event(event: &ActivityEvent) -> Self {
        Self {
            id: event.id.0,
            event_type: event.event_type.clone(),
            event_category: event.event_category.clone(),
            timestamp: event.created_at,
            org_id: event.org_id.0,
            employee_id: event.employee_id,
            proxy_session_id: event.session_id,
            client_name: event.client_name.clone(),
            client_version: event.client_version.clone(),
            content: event.content.clone().unwrap_or_default(),
            payload: event.payload.clone().unwrap_or(serde_json::Value::Null),
        }
    }

    /// Serializes the envelope to the exact bytes that are signed and sent.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
