//! Repository for webhook destination configuration.
//!
//! Destinations define where activity events are forwarded and under what
//! retry, timeout, and authentication policy. The delivery pipeline only
//! reads them; registry CRUD writes through `create`/`update` paths owned
//! by the management surface.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Destination, DestinationId, OrgId},
};

/// Repository for destination database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates a new destination after validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed URL or empty name, and
    /// `ConstraintViolation` when the (org, name) pair already exists.
    pub async fn create(&self, destination: &Destination) -> Result<DestinationId> {
        destination.validate()?;

        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhook_destinations (
                id, org_id, name, url, event_types, auth_type, auth_config,
                signing_secret, enabled, batch_size, timeout_ms,
                retry_max, retry_backoff_ms, created_by, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15
            )
            RETURNING id
            ",
        )
        .bind(destination.id)
        .bind(destination.org_id)
        .bind(&destination.name)
        .bind(&destination.url)
        .bind(&destination.event_types)
        .bind(destination.auth.auth_type())
        .bind(destination.auth.to_config_json())
        .bind(&destination.signing_secret)
        .bind(destination.enabled)
        .bind(destination.batch_size)
        .bind(destination.timeout_ms)
        .bind(destination.retry_max)
        .bind(destination.retry_backoff_ms)
        .bind(destination.created_by)
        .bind(destination.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Lists all enabled destinations across organizations.
    ///
    /// This is the discovery worker's entry point; disabled destinations
    /// are invisible to the entire pipeline.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_enabled(&self) -> Result<Vec<Destination>> {
        let destinations = sqlx::query_as::<_, Destination>(
            r"
            SELECT id, org_id, name, url, event_types, auth_type, auth_config,
                   signing_secret, enabled, batch_size, timeout_ms,
                   retry_max, retry_backoff_ms, created_by, created_at, updated_at
            FROM webhook_destinations
            WHERE enabled = TRUE
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(destinations)
    }

    /// Finds a destination scoped to its owning organization.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. `Ok(None)` when no such
    /// destination exists in that organization.
    pub async fn find_by_id(
        &self,
        id: DestinationId,
        org_id: OrgId,
    ) -> Result<Option<Destination>> {
        let destination = sqlx::query_as::<_, Destination>(
            r"
            SELECT id, org_id, name, url, event_types, auth_type, auth_config,
                   signing_secret, enabled, batch_size, timeout_ms,
                   retry_max, retry_backoff_ms, created_by, created_at, updated_at
            FROM webhook_destinations
            WHERE id = $1 AND org_id = $2
            ",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(destination)
    }
}
