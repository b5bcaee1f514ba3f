//! On-demand destination probing.
//!
//! Sends a synthetic test event through the exact same signing,
//! authentication, and timeout path as real deliveries, so a passing
//! probe means the destination would accept production traffic. Probe
//! results are reported to the caller and never touch delivery records.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, DeliveryId, Destination};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    envelope::EventEnvelope,
    error::Result,
};

/// Event type carried by probe requests.
///
/// Receivers should recognize this type and skip business processing.
pub const PROBE_EVENT_TYPE: &str = "courier.test";

/// Outcome of a destination probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// True when the destination answered with a 2xx status.
    pub success: bool,

    /// HTTP status received, when the request completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Round-trip latency of the probe request.
    pub latency_ms: u64,

    /// Transport error description when no response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends a synthetic event to the destination and reports the outcome.
///
/// Failures are captured in the result rather than returned; the only
/// error path is a request that cannot be constructed at all.
///
/// # Errors
///
/// Returns `Serialization` if the probe envelope cannot be serialized.
pub async fn probe_destination(
    client: &DeliveryClient,
    destination: &Destination,
    clock: &Arc<dyn Clock>,
) -> Result<ProbeResult> {
    let envelope = EventEnvelope {
        id: Uuid::new_v4(),
        event_type: PROBE_EVENT_TYPE.to_string(),
        event_category: "test".to_string(),
        timestamp: clock.now_utc(),
        org_id: destination.org_id.0,
        employee_id: None,
        proxy_session_id: None,
        client_name: None,
        client_version: None,
        content: "Test webhook delivery".to_string(),
        payload: serde_json::json!({ "destination_id": destination.id.to_string() }),
    };
    let body = envelope.to_bytes()?;

    let request = DeliveryRequest {
        url: &destination.url,
        body: body.into(),
        event_type: PROBE_EVENT_TYPE,
        delivery_id: DeliveryId::new(),
        auth: &destination.auth,
        signing_secret: destination.signing_secret.as_deref(),
        timeout: Duration::from_millis(u64::try_from(destination.timeout_ms.max(0)).unwrap_or(0)),
    };

    let started = clock.now();
    let outcome = client.deliver(request).await;
    let latency_ms =
        u64::try_from(clock.now().saturating_duration_since(started).as_millis()).unwrap_or(u64::MAX);

    let result = match outcome {
        Ok(response) => ProbeResult {
            success: response.is_success(),
            status: Some(response.status),
            latency_ms,
            error: None,
        },
        Err(e) => ProbeResult { success: false, status: None, latency_ms, error: Some(e.to_string()) },
    };

    info!(
        destination_id = %destination.id,
        success = result.success,
        status = ?result.status,
        latency_ms,
        "destination probe completed"
    );
    Ok(result)
}
