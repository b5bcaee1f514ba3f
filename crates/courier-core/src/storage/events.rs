//! Read-mostly repository for activity events.
//!
//! Events are produced elsewhere and immutable once persisted. The
//! delivery pipeline reads them by ID during dispatch and scans for
//! undelivered IDs during discovery; `create` exists for the producer
//! contract and test fixtures.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{ActivityEvent, DestinationId, EventId, OrgId},
};

/// Repository for activity event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists an activity event.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, event: &ActivityEvent) -> Result<EventId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO activity_events (
                id, org_id, event_type, event_category, employee_id, session_id,
                client_name, client_version, content, payload, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            ",
        )
        .bind(event.id)
        .bind(event.org_id)
        .bind(&event.event_type)
        .bind(&event.event_category)
        .bind(event.employee_id)
        .bind(event.session_id)
        .bind(&event.client_name)
        .bind(&event.client_version)
        .bind(&event.content)
        .bind(&event.payload)
        .bind(event.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Fetches a single event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. `Ok(None)` when the event does
    /// not exist.
    pub async fn find_by_id(&self, id: EventId) -> Result<Option<ActivityEvent>> {
        let event = sqlx::query_as::<_, ActivityEvent>(
            r"
            SELECT id, org_id, event_type, event_category, employee_id, session_id,
                   client_name, client_version, content, payload, created_at
            FROM activity_events
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Lists IDs of events in the lookback window that have no delivery
    /// record for the given destination.
    ///
    /// Events older than `since` are never discovered; very stale
    /// undelivered events are abandoned rather than delivered late.
    /// Ordered oldest first so a capped batch drains the backlog in FIFO
    /// order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_undelivered(
        &self,
        destination_id: DestinationId,
        org_id: OrgId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT e.id
            FROM activity_events e
            WHERE e.org_id = $2
              AND e.created_at >= $3
              AND NOT EXISTS (
                  SELECT 1 FROM webhook_deliveries d
                  WHERE d.destination_id = $1 AND d.event_id = e.id
              )
            ORDER BY e.created_at ASC
            LIMIT $4
            ",
        )
        .bind(destination_id)
        .bind(org_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids.into_iter().map(EventId).collect())
    }
}
