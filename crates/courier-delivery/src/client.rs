//! HTTP client for outbound webhook delivery.
//!
//! Wraps a shared reqwest client: builds the request with signature,
//! authentication, and correlation headers, applies the destination's
//! per-attempt timeout, and captures a truncated slice of the response
//! body for diagnostics.

use std::time::Duration;

use bytes::Bytes;
use courier_core::{AuthConfig, DeliveryId};
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    signing::{apply_auth, sign_payload},
    MAX_CAPTURED_BODY_BYTES,
};

/// Header carrying the HMAC-SHA256 payload signature.
pub const HEADER_SIGNATURE: &str = "X-Courier-Signature";

/// Header carrying the event type for receiver-side routing.
pub const HEADER_EVENT_TYPE: &str = "X-Courier-Event-Type";

/// Header carrying the delivery record ID for receiver-side deduplication.
pub const HEADER_DELIVERY_ID: &str = "X-Courier-Delivery-Id";

/// Configuration for the delivery HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on any single attempt, regardless of destination
    /// configuration.
    pub max_timeout: Duration,

    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            user_agent: "Courier-Webhook/1.0".to_string(),
        }
    }
}

/// A single outbound delivery attempt.
#[derive(Debug)]
pub struct DeliveryRequest<'a> {
    /// Target URL.
    pub url: &'a str,

    /// Serialized envelope bytes. Signed exactly as sent.
    pub body: Bytes,

    /// Event type for the routing header.
    pub event_type: &'a str,

    /// Delivery record ID for the correlation header.
    pub delivery_id: DeliveryId,

    /// Authentication to attach.
    pub auth: &'a AuthConfig,

    /// HMAC secret; `None` sends the request unsigned.
    pub signing_secret: Option<&'a str>,

    /// Per-attempt timeout from destination configuration.
    pub timeout: Duration,
}

/// Outcome of an attempt that reached the remote endpoint.
///
/// Any HTTP response, success or failure, produces one of these; only
/// transport-level failures surface as [`DeliveryError`].
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code returned by the destination.
    pub status: u16,

    /// Response body, truncated to [`MAX_CAPTURED_BODY_BYTES`].
    pub body: String,
}

impl DeliveryResponse {
    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client used by the dispatcher and the probe endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.max_timeout)
            .build()
            .map_err(|e| DeliveryError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Executes one delivery attempt.
    ///
    /// The destination timeout is clamped to the client's `max_timeout`.
    /// Non-2xx responses are returned as `Ok`; classification is the
    /// caller's concern.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or `Network` when no HTTP response was received.
    pub async fn deliver(&self, request: DeliveryRequest<'_>) -> Result<DeliveryResponse> {
        let timeout = request.timeout.min(self.config.max_timeout);

        let mut builder = self
            .client
            .post(request.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_EVENT_TYPE, request.event_type)
            .header(HEADER_DELIVERY_ID, request.delivery_id.to_string());

        if let Some(secret) = request.signing_secret {
            builder = builder.header(HEADER_SIGNATURE, sign_payload(&request.body, secret));
        }
        builder = apply_auth(builder, request.auth);

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| DeliveryError::from_reqwest(&e, timeout.as_millis() as u64))?;

        let status = response.status().as_u16();
        let body = Self::capture_body(response).await;

        debug!(delivery_id = %request.delivery_id, status, "delivery attempt completed");

        Ok(DeliveryResponse { status, body })
    }

    /// Reads at most [`MAX_CAPTURED_BODY_BYTES`] of the response body.
    ///
    /// The read itself is bounded: streaming stops at the cap, so an
    /// oversized body is never buffered in full. A body read failure
    /// after the status line is not a delivery failure; the capture is
    /// diagnostics only.
    async fn capture_body(mut response: reqwest::Response) -> String {
        let mut buf = Vec::with_capacity(MAX_CAPTURED_BODY_BYTES);
        while buf.len() < MAX_CAPTURED_BODY_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = MAX_CAPTURED_BODY_BYTES - buf.len();
                    buf.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                },
                Ok(None) | Err(_) => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_success_range() {
        assert!(DeliveryResponse { status: 200, body: String::new() }.is_success());
        assert!(DeliveryResponse { status: 204, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 199, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 300, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 500, body: String::new() }.is_success());
    }

    #[test]
    fn default_config_has_sane_bounds() {
        let config = ClientConfig::default();
        assert!(config.connect_timeout < config.max_timeout);
        assert!(config.user_agent.starts_with("Courier-Webhook/"));
    }
}
