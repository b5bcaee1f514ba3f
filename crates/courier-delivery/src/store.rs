//! Storage abstraction for the delivery pipeline.
//!
//! Both workers depend on this trait rather than on the concrete Postgres
//! repositories, so discovery and dispatch logic, retry accounting, and
//! failure handling are all testable against an in-memory double. The
//! production implementation delegates to `courier_core::storage::Storage`.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use courier_core::{
    ActivityEvent, DeliveryId, DeliveryRecord, Destination, DestinationId, EventId, OrgId,
};

type CoreResult<T> = courier_core::Result<T>;

/// Store operations required by discovery and dispatch.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Lists every enabled destination across all organizations.
    ///
    /// Discovery's entry point. Disabled destinations are invisible to the
    /// entire pipeline.
    fn list_enabled_destinations(
        &self,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<Destination>>> + Send + '_>>;

    /// Lists IDs of events in the destination's organization, created at
    /// or after `since`, that have no delivery record for this
    /// destination. Oldest first, capped at `limit`.
    fn list_undelivered_events(
        &self,
        destination_id: DestinationId,
        org_id: OrgId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<EventId>>> + Send + '_>>;

    /// Fetches a single event by ID.
    fn get_event(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<ActivityEvent>>> + Send + '_>>;

    /// Creates a Pending delivery record for a (destination, event) pair.
    ///
    /// Idempotent: `Ok(None)` when a record for the pair already exists,
    /// regardless of its status.
    fn create_delivery(
        &self,
        destination_id: DestinationId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<DeliveryId>>> + Send + '_>>;

    /// Selects Pending records that are due at `now`, oldest first.
    fn select_due_deliveries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<DeliveryRecord>>> + Send + '_>>;

    /// Marks a record Delivered. Terminal; increments the attempt counter
    /// and clears any previous error.
    fn mark_delivered(
        &self,
        id: DeliveryId,
        response_status: i32,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>>;

    /// Records a failed attempt.
    ///
    /// With `next_retry_at` set the record stays Pending; without it the
    /// record becomes Exhausted. `attempts` is the caller's post-attempt
    /// count and is written as-is.
    #[allow(clippy::too_many_arguments)]
    fn mark_failed(
        &self,
        id: DeliveryId,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: String,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>>;

    /// Fetches a destination scoped to its organization.
    fn get_destination(
        &self,
        id: DestinationId,
        org_id: OrgId,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<Destination>>> + Send + '_>>;
}

/// Production store backed by PostgreSQL repositories.
pub struct PostgresDeliveryStore {
    storage: Arc<courier_core::storage::Storage>,
}

impl PostgresDeliveryStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<courier_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStore for PostgresDeliveryStore {
    fn list_enabled_destinations(
        &self,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<Destination>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.destinations.list_enabled().await })
    }

    fn list_undelivered_events(
        &self,
        destination_id: DestinationId,
        org_id: OrgId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<EventId>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.events.list_undelivered(destination_id, org_id, since, limit).await
        })
    }

    fn get_event(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<ActivityEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.events.find_by_id(id).await })
    }

    fn create_delivery(
        &self,
        destination_id: DestinationId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<DeliveryId>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.create(destination_id, event_id, now).await })
    }

    fn select_due_deliveries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<DeliveryRecord>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.select_due(limit, now).await })
    }

    fn mark_delivered(
        &self,
        id: DeliveryId,
        response_status: i32,
        response_body: Option<String>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.deliveries.mark_delivered(id, response_status, response_body, now).await
        })
    }

    fn mark_failed(
        &self,
        id: DeliveryId,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: String,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .deliveries
                .mark_failed(
                    id,
                    response_status,
                    response_body,
                    &error_message,
                    attempts,
                    next_retry_at,
                    now,
                )
                .await
        })
    }

    fn get_destination(
        &self,
        id: DestinationId,
        org_id: OrgId,
    ) -> Pin<Box<dyn Future<Output = CoreResult<Option<Destination>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.destinations.find_by_id(id, org_id).await })
    }
}

pub mod mock {
    //! In-memory store double for worker tests.
    //!
    //! Mirrors the Postgres store's observable semantics exactly: record
    //! creation is idempotent per (destination, event) pair, successful
    //! delivery increments the attempt counter, and failure writes the
    //! caller's count verbatim. Supports targeted error injection so tests
    //! can exercise per-destination isolation and skip-on-error paths.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use chrono::{DateTime, Utc};
    use courier_core::{
        ActivityEvent, CoreError, DeliveryId, DeliveryRecord, DeliveryStatus, Destination,
        DestinationId, EventId, OrgId,
    };
    use tokio::sync::RwLock;

    use super::{CoreResult, DeliveryStore};

    /// In-memory store with error injection.
    pub struct MockDeliveryStore {
        destinations: Arc<RwLock<Vec<Destination>>>,
        events: Arc<RwLock<HashMap<EventId, ActivityEvent>>>,
        deliveries: Arc<RwLock<HashMap<DeliveryId, DeliveryRecord>>>,
        undelivered_errors: Arc<RwLock<HashMap<DestinationId, String>>>,
        select_error: Arc<RwLock<Option<String>>>,
    }

    impl MockDeliveryStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self {
                destinations: Arc::new(RwLock::new(Vec::new())),
                events: Arc::new(RwLock::new(HashMap::new())),
                deliveries: Arc::new(RwLock::new(HashMap::new())),
                undelivered_errors: Arc::new(RwLock::new(HashMap::new())),
                select_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Registers a destination.
        pub async fn add_destination(&self, destination: Destination) {
            self.destinations.write().await.push(destination);
        }

        /// Persists an activity event.
        pub async fn add_event(&self, event: ActivityEvent) {
            self.events.write().await.insert(event.id, event);
        }

        /// Makes the next undelivered-events scan for one destination fail.
        ///
        /// Consumed on use; subsequent scans succeed again.
        pub async fn inject_undelivered_error(&self, destination_id: DestinationId, error: String) {
            self.undelivered_errors.write().await.insert(destination_id, error);
        }

        /// Makes the next due-record selection fail. Consumed on use.
        pub async fn inject_select_error(&self, error: String) {
            *self.select_error.write().await = Some(error);
        }

        /// Returns all delivery records, in no particular order.
        pub async fn all_deliveries(&self) -> Vec<DeliveryRecord> {
            self.deliveries.read().await.values().cloned().collect()
        }

        /// Returns the record for a (destination, event) pair, if any.
        pub async fn delivery_for(
            &self,
            destination_id: DestinationId,
            event_id: EventId,
        ) -> Option<DeliveryRecord> {
            self.deliveries
                .read()
                .await
                .values()
                .find(|r| r.destination_id == destination_id && r.event_id == event_id)
                .cloned()
        }
    }

    impl Default for MockDeliveryStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DeliveryStore for MockDeliveryStore {
        fn list_enabled_destinations(
            &self,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<Destination>>> + Send + '_>> {
            let destinations = self.destinations.clone();
            Box::pin(async move {
                let mut enabled: Vec<Destination> =
                    destinations.read().await.iter().filter(|d| d.enabled).cloned().collect();
                enabled.sort_by_key(|d| d.created_at);
                Ok(enabled)
            })
        }

        fn list_undelivered_events(
            &self,
            destination_id: DestinationId,
            org_id: OrgId,
            since: DateTime<Utc>,
            limit: i64,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<EventId>>> + Send + '_>> {
            let events = self.events.clone();
            let deliveries = self.deliveries.clone();
            let errors = self.undelivered_errors.clone();

            Box::pin(async move {
                if let Some(error) = errors.write().await.remove(&destination_id) {
                    return Err(CoreError::Database(error));
                }

                let deliveries = deliveries.read().await;
                let mut candidates: Vec<(DateTime<Utc>, EventId)> = events
                    .read()
                    .await
                    .values()
                    .filter(|e| e.org_id == org_id && e.created_at >= since)
                    .filter(|e| {
                        !deliveries
                            .values()
                            .any(|d| d.destination_id == destination_id && d.event_id == e.id)
                    })
                    .map(|e| (e.created_at, e.id))
                    .collect();
                candidates.sort_by_key(|(created_at, _)| *created_at);
                candidates.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

                Ok(candidates.into_iter().map(|(_, id)| id).collect())
            })
        }

        fn get_event(
            &self,
            id: EventId,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Option<ActivityEvent>>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move { Ok(events.read().await.get(&id).cloned()) })
        }

        fn create_delivery(
            &self,
            destination_id: DestinationId,
            event_id: EventId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Option<DeliveryId>>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                let mut deliveries = deliveries.write().await;
                let exists = deliveries
                    .values()
                    .any(|d| d.destination_id == destination_id && d.event_id == event_id);
                if exists {
                    return Ok(None);
                }

                let id = DeliveryId::new();
                deliveries.insert(id, DeliveryRecord {
                    id,
                    destination_id,
                    event_id,
                    status: DeliveryStatus::Pending,
                    attempts: 0,
                    last_attempt_at: None,
                    next_retry_at: None,
                    response_status: None,
                    response_body: None,
                    error_message: None,
                    delivered_at: None,
                    created_at: now,
                });
                Ok(Some(id))
            })
        }

        fn select_due_deliveries(
            &self,
            limit: i64,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Vec<DeliveryRecord>>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            let select_error = self.select_error.clone();

            Box::pin(async move {
                if let Some(error) = select_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let mut due: Vec<DeliveryRecord> = deliveries
                    .read()
                    .await
                    .values()
                    .filter(|r| r.status == DeliveryStatus::Pending)
                    .filter(|r| r.next_retry_at.map_or(true, |at| at <= now))
                    .cloned()
                    .collect();
                due.sort_by_key(|r| r.created_at);
                due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                Ok(due)
            })
        }

        fn mark_delivered(
            &self,
            id: DeliveryId,
            response_status: i32,
            response_body: Option<String>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                if let Some(record) = deliveries.write().await.get_mut(&id) {
                    record.status = DeliveryStatus::Delivered;
                    record.attempts += 1;
                    record.last_attempt_at = Some(now);
                    record.delivered_at = Some(now);
                    record.next_retry_at = None;
                    record.response_status = Some(response_status);
                    record.response_body = response_body;
                    record.error_message = None;
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            id: DeliveryId,
            response_status: Option<i32>,
            response_body: Option<String>,
            error_message: String,
            attempts: i32,
            next_retry_at: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                if let Some(record) = deliveries.write().await.get_mut(&id) {
                    record.status = if next_retry_at.is_some() {
                        DeliveryStatus::Pending
                    } else {
                        DeliveryStatus::Exhausted
                    };
                    record.attempts = attempts;
                    record.last_attempt_at = Some(now);
                    record.next_retry_at = next_retry_at;
                    record.response_status = response_status;
                    record.response_body = response_body;
                    record.error_message = Some(error_message);
                }
                Ok(())
            })
        }

        fn get_destination(
            &self,
            id: DestinationId,
            org_id: OrgId,
        ) -> Pin<Box<dyn Future<Output = CoreResult<Option<Destination>>> + Send + '_>> {
            let destinations = self.destinations.clone();
            Box::pin(async move {
                Ok(destinations
                    .read()
                    .await
                    .iter()
                    .find(|d| d.id == id && d.org_id == org_id)
                    .cloned())
            })
        }
    }
}
