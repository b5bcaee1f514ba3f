//! Repository for delivery record operations.
//!
//! Delivery records are the per-(destination, event) ledger of attempts.
//! The unique (destination_id, event_id) index enforces the idempotency
//! invariant at the database level; discovery relies on `ON CONFLICT DO
//! NOTHING` so re-running a pass can never create a duplicate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{DeliveryId, DeliveryRecord, DestinationId, EventId},
};

const SELECT_COLUMNS: &str = "id, destination_id, event_id, status, attempts, \
     last_attempt_at, next_retry_at, response_status, response_body, \
     error_message, delivered_at, created_at";

/// Repository for delivery record database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a Pending delivery record for a (destination, event) pair.
    ///
    /// Idempotent: when a record for the pair already exists, regardless
    /// of its status, nothing is inserted and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for reasons other than the
    /// uniqueness constraint.
    pub async fn create(
        &self,
        destination_id: DestinationId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryId>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r"
            INSERT INTO webhook_deliveries (
                id, destination_id, event_id, status, attempts, created_at
            ) VALUES (
                $1, $2, $3, 'pending', 0, $4
            )
            ON CONFLICT (destination_id, event_id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(DeliveryId::new())
        .bind(destination_id)
        .bind(event_id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(id.map(DeliveryId))
    }

    /// Selects Pending records that are due for dispatch.
    ///
    /// A record is due when `next_retry_at` is null (fresh) or in the
    /// past. Terminal records are never returned. Oldest records first so
    /// retries do not starve fresh work indefinitely.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn select_due(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>> {
        let records = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM webhook_deliveries
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    /// Marks a record as successfully delivered. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_delivered(
        &self,
        id: DeliveryId,
        response_status: i32,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'delivered',
                attempts = attempts + 1,
                last_attempt_at = $2,
                delivered_at = $2,
                next_retry_at = NULL,
                response_status = $3,
                response_body = $4,
                error_message = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(now)
        .bind(response_status)
        .bind(response_body)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// With `next_retry_at` set the record stays Pending and becomes
    /// eligible again after the backoff delay; without it the retry
    /// budget is spent and the record enters the terminal Exhausted
    /// state.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_failed(
        &self,
        id: DeliveryId,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let status = if next_retry_at.is_some() { "pending" } else { "exhausted" };

        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = $2,
                attempts = $3,
                last_attempt_at = $4,
                next_retry_at = $5,
                response_status = $6,
                response_body = $7,
                error_message = $8
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(attempts)
        .bind(now)
        .bind(next_retry_at)
        .bind(response_status)
        .bind(response_body)
        .bind(error_message)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a single record by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. `Ok(None)` when the record does
    /// not exist.
    pub async fn find_by_id(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM webhook_deliveries
            WHERE id = $1
            "
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }
}
