//! Discovery worker: turns activity events into pending delivery records.
//!
//! Each pass scans every enabled destination, finds events in the lookback
//! window that have no delivery record for that destination, applies the
//! destination's event-type filter, and creates Pending records. All
//! record creation goes through the idempotent store insert, so crashed or
//! overlapping passes never duplicate work.

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use courier_core::{Clock, Destination};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{error::Result, store::DeliveryStore};

/// Configuration for the discovery worker.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Delay between discovery passes.
    pub interval: Duration,

    /// How far back to scan for undelivered events.
    ///
    /// Events older than this are abandoned; a destination disabled for
    /// longer than the window misses the events recorded meanwhile.
    pub lookback: ChronoDuration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::DEFAULT_DISCOVERY_INTERVAL_SECS),
            lookback: ChronoDuration::hours(crate::DEFAULT_LOOKBACK_HOURS),
        }
    }
}

/// Background worker creating delivery records for undelivered events.
pub struct DiscoveryWorker {
    store: Arc<dyn DeliveryStore>,
    config: DiscoveryConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl DiscoveryWorker {
    /// Creates a new discovery worker.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        config: DiscoveryConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, config, clock, shutdown }
    }

    /// Runs discovery passes until shutdown is signalled.
    ///
    /// A failed pass is logged and retried on the next tick; the loop
    /// itself never exits on error.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            lookback_hours = self.config.lookback.num_hours(),
            "discovery worker started"
        );

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "discovery pass failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.config.interval) => {},
                () = self.shutdown.cancelled() => {
                    info!("discovery worker shutting down");
                    break;
                },
            }
        }
    }

    /// Executes a single discovery pass. Returns the number of delivery
    /// records created.
    ///
    /// Destinations are isolated from each other: a store failure while
    /// scanning one destination is logged and skipped, and the pass
    /// continues with the rest.
    ///
    /// # Errors
    ///
    /// Returns error only when the initial destination listing fails.
    pub async fn run_once(&self) -> Result<usize> {
        let destinations = self.store.list_enabled_destinations().await?;
        let mut created = 0;

        for destination in &destinations {
            match self.discover_for_destination(destination).await {
                Ok(count) => created += count,
                Err(e) => {
                    error!(
                        destination_id = %destination.id,
                        error = %e,
                        "discovery failed for destination, skipping"
                    );
                },
            }
        }

        if created > 0 {
            info!(created, destinations = destinations.len(), "discovery pass complete");
        }
        Ok(created)
    }

    async fn discover_for_destination(&self, destination: &Destination) -> Result<usize> {
        let now = self.clock.now_utc();
        let since = now - self.config.lookback;

        let event_ids = self
            .store
            .list_undelivered_events(
                destination.id,
                destination.org_id,
                since,
                i64::from(destination.batch_size),
            )
            .await?;

        let mut created = 0;
        for event_id in event_ids {
            let Some(event) = self.store.get_event(event_id).await? else {
                // Deleted between the scan and the fetch.
                continue;
            };

            if !event_type_matches(&destination.event_types, &event.event_type) {
                continue;
            }

            if let Some(id) = self.store.create_delivery(destination.id, event_id, now).await? {
                debug!(
                    delivery_id = %id,
                    destination_id = %destination.id,
                    event_id = %event_id,
                    event_type = %event.event_type,
                    "delivery record created"
                );
                created += 1;
            }
        }

        Ok(created)
    }
}

/// Applies the destination's event-type filter.
///
/// An empty filter subscribes to every event type; otherwise the event
/// type must match one entry exactly.
pub fn event_type_matches(filter: &[String], event_type: &str) -> bool {
    filter.is_empty() || filter.iter().any(|t| t == event_type)
}
