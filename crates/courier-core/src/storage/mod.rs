//! Database access layer implementing the repository pattern.
//!
//! The repositories translate between domain models and the PostgreSQL
//! schema. All SQL lives here; the delivery engine reaches the database
//! only through the [`Storage`] container and the store trait built on
//! top of it.

use std::sync::Arc;

use sqlx::PgPool;

pub mod deliveries;
pub mod destinations;
pub mod events;

use crate::error::Result;

/// Container for all repository instances providing unified database
/// access.
///
/// All repositories share one connection pool. `Storage` is cheap to
/// clone and safe to share across worker tasks.
#[derive(Clone)]
pub struct Storage {
    /// Repository for webhook destination configuration.
    pub destinations: Arc<destinations::Repository>,

    /// Read-only repository for activity events.
    pub events: Arc<events::Repository>,

    /// Repository for delivery records.
    pub deliveries: Arc<deliveries::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            destinations: Arc::new(destinations::Repository::new(pool.clone())),
            events: Arc::new(events::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) =
            sqlx::query_as("SELECT 1").fetch_one(&*self.destinations.pool()).await?;
        Ok(())
    }
}
