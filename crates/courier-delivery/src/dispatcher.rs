//! Dispatch worker: drains due delivery records over HTTP.
//!
//! Each pass selects due Pending records oldest-first, executes one
//! delivery attempt per record, and writes the outcome back: Delivered on
//! any 2xx, otherwise a retry schedule under exponential backoff until the
//! destination's attempt budget is spent and the record is Exhausted.
//!
//! Exactly one dispatcher instance must run against a given database;
//! record selection is not guarded against concurrent claimants.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_core::{ActivityEvent, Clock, DeliveryRecord, Destination};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    envelope::EventEnvelope,
    error::Result,
    store::DeliveryStore,
};

/// Caps the backoff exponent so the multiplier cannot overflow even for
/// absurd attempt counts.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Configuration for the dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between dispatch passes.
    pub interval: Duration,

    /// Maximum records processed per pass.
    pub batch_size: i64,

    /// Attempt budget applied when the destination cannot be loaded.
    pub fallback_retry_max: i32,

    /// Backoff base applied when the destination cannot be loaded.
    pub fallback_backoff_ms: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::DEFAULT_DISPATCH_INTERVAL_SECS),
            batch_size: crate::DEFAULT_DISPATCH_BATCH_SIZE,
            fallback_retry_max: 3,
            fallback_backoff_ms: 60_000,
        }
    }
}

/// Computes the delay before the next retry.
///
/// `attempt` is the 1-based number of the attempt that just failed; the
/// delay doubles with each one: base, 2x base, 4x base. The exponent is
/// clamped so the arithmetic cannot overflow.
pub fn backoff_delay(base_ms: i32, attempt: i32) -> ChronoDuration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(0).min(MAX_BACKOFF_EXPONENT);
    ChronoDuration::milliseconds(i64::from(base_ms.max(0)) << exponent)
}

/// Background worker executing delivery attempts for due records.
pub struct Dispatcher {
    store: Arc<dyn DeliveryStore>,
    client: DeliveryClient,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a new dispatch worker.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        client: DeliveryClient,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, client, config, clock, shutdown }
    }

    /// Runs dispatch passes until shutdown is signalled.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "dispatch worker started"
        );

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "dispatch pass failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.config.interval) => {},
                () = self.shutdown.cancelled() => {
                    info!("dispatch worker shutting down");
                    break;
                },
            }
        }
    }

    /// Executes a single dispatch pass. Returns the number of records
    /// processed.
    ///
    /// Records are isolated from each other: a failure while processing
    /// one record never aborts the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns error only when the due-record selection itself fails.
    pub async fn run_once(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let records = self.store.select_due_deliveries(self.config.batch_size, now).await?;
        let processed = records.len();

        for record in records {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.process_record(record).await;
        }

        Ok(processed)
    }

    /// Processes one due record end to end.
    ///
    /// Store read failures leave the record untouched so the next pass
    /// retries it without spending an attempt; everything after a
    /// successful load counts against the attempt budget.
    async fn process_record(&self, record: DeliveryRecord) {
        let event = match self.store.get_event(record.event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // The event is gone; redelivery can never succeed.
                warn!(
                    delivery_id = %record.id,
                    event_id = %record.event_id,
                    "event no longer exists, exhausting record"
                );
                self.record_failure(
                    &record,
                    None,
                    None,
                    "event no longer exists".to_string(),
                    0,
                )
                .await;
                return;
            },
            Err(e) => {
                error!(delivery_id = %record.id, error = %e, "failed to load event, skipping");
                return;
            },
        };

        let destination = match self.store.get_destination(record.destination_id, event.org_id).await
        {
            Ok(Some(destination)) if destination.enabled => destination,
            Ok(_) => {
                // Missing or disabled destination still burns an attempt so
                // the record eventually exhausts instead of looping forever.
                warn!(
                    delivery_id = %record.id,
                    destination_id = %record.destination_id,
                    "destination missing or disabled"
                );
                self.record_failure_with_policy(
                    &record,
                    None,
                    None,
                    "destination missing or disabled".to_string(),
                    self.config.fallback_retry_max,
                    self.config.fallback_backoff_ms,
                )
                .await;
                return;
            },
            Err(e) => {
                error!(
                    delivery_id = %record.id,
                    error = %e,
                    "failed to load destination, skipping"
                );
                return;
            },
        };

        self.attempt_delivery(&record, &destination, &event).await;
    }

    async fn attempt_delivery(
        &self,
        record: &DeliveryRecord,
        destination: &Destination,
        event: &ActivityEvent,
    ) {
        let body = match EventEnvelope::from_event(event).to_bytes() {
            Ok(body) => body,
            Err(e) => {
                // Serialization is deterministic; retrying cannot help.
                error!(delivery_id = %record.id, error = %e, "envelope serialization failed");
                self.record_failure(record, None, None, e.to_string(), 0).await;
                return;
            },
        };

        let request = DeliveryRequest {
            url: &destination.url,
            body: body.into(),
            event_type: &event.event_type,
            delivery_id: record.id,
            auth: &destination.auth,
            signing_secret: destination.signing_secret.as_deref(),
            timeout: Duration::from_millis(u64::try_from(destination.timeout_ms.max(0)).unwrap_or(0)),
        };

        match self.client.deliver(request).await {
            Ok(response) if response.is_success() => {
                let now = self.clock.now_utc();
                debug!(
                    delivery_id = %record.id,
                    status = response.status,
                    attempts = record.attempts + 1,
                    "delivered"
                );
                if let Err(e) = self
                    .store
                    .mark_delivered(
                        record.id,
                        i32::from(response.status),
                        Some(response.body),
                        now,
                    )
                    .await
                {
                    error!(delivery_id = %record.id, error = %e, "failed to mark delivered");
                }
            },
            Ok(response) => {
                // Body is already truncated by the client's capture cap.
                let error_message = format!("HTTP {}: {}", response.status, response.body);
                self.record_failure_with_policy(
                    record,
                    Some(i32::from(response.status)),
                    Some(response.body),
                    error_message,
                    destination.retry_max,
                    destination.retry_backoff_ms,
                )
                .await;
            },
            Err(e) => {
                let retry_max = if e.is_retryable() { destination.retry_max } else { 0 };
                self.record_failure_with_policy(
                    record,
                    None,
                    None,
                    e.to_string(),
                    retry_max,
                    destination.retry_backoff_ms,
                )
                .await;
            },
        }
    }

    /// Records a failed attempt with no retry budget. The record exhausts
    /// immediately.
    async fn record_failure(
        &self,
        record: &DeliveryRecord,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: String,
        retry_max: i32,
    ) {
        self.record_failure_with_policy(
            record,
            response_status,
            response_body,
            error_message,
            retry_max,
            0,
        )
        .await;
    }

    /// Records a failed attempt under the given retry policy.
    ///
    /// The attempt counter advances by one; while it stays below
    /// `retry_max` the next attempt is scheduled at
    /// `now + backoff_base * 2^(attempts - 1)`, otherwise the record
    /// exhausts.
    async fn record_failure_with_policy(
        &self,
        record: &DeliveryRecord,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: String,
        retry_max: i32,
        backoff_base_ms: i32,
    ) {
        let now = self.clock.now_utc();
        let attempts = record.attempts + 1;
        let next_retry_at: Option<DateTime<Utc>> = if attempts < retry_max {
            Some(now + backoff_delay(backoff_base_ms, attempts))
        } else {
            None
        };

        if next_retry_at.is_some() {
            debug!(
                delivery_id = %record.id,
                attempts,
                error = %error_message,
                "attempt failed, retry scheduled"
            );
        } else {
            warn!(
                delivery_id = %record.id,
                attempts,
                error = %error_message,
                "retry budget exhausted"
            );
        }

        if let Err(e) = self
            .store
            .mark_failed(
                record.id,
                response_status,
                response_body,
                error_message,
                attempts,
                next_retry_at,
                now,
            )
            .await
        {
            error!(delivery_id = %record.id, error = %e, "failed to record attempt outcome");
        }
    }
}
