//! Outbound webhook delivery engine.
//!
//! Turns persisted organization activity events into signed, authenticated
//! HTTP POSTs against configured destinations, with at-least-once
//! semantics and bounded exponential retry.
//!
//! # Architecture
//!
//! Two independent timer-driven workers share one [`store::DeliveryStore`]:
//!
//! 1. **Discovery** ([`discovery::DiscoveryWorker`]) scans enabled
//!    destinations, finds events without a delivery record for that
//!    destination, applies the event-type filter, and creates Pending
//!    records. Creation is idempotent; re-running a pass never duplicates
//!    work.
//! 2. **Dispatch** ([`dispatcher::Dispatcher`]) drains due Pending
//!    records: builds the JSON envelope, signs and authenticates the
//!    request, POSTs with the destination's timeout, classifies the
//!    outcome, and either marks the record Delivered or schedules the
//!    next retry until the budget is exhausted.
//!
//! There is no direct call path between the workers; all coordination
//! happens through delivery record state. A single dispatcher instance is
//! assumed; concurrent replicas would race on record selection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod discovery;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod probe;
pub mod signing;
pub mod store;

pub use client::{ClientConfig, DeliveryClient};
pub use discovery::{DiscoveryConfig, DiscoveryWorker};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DeliveryError, Result};
pub use probe::{probe_destination, ProbeResult};
pub use store::{DeliveryStore, PostgresDeliveryStore};

/// Default interval between discovery passes.
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 30;

/// Default interval between dispatch passes.
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 5;

/// Default maximum records processed per dispatch pass.
pub const DEFAULT_DISPATCH_BATCH_SIZE: i64 = 100;

/// Default discovery lookback window in hours.
///
/// Undelivered events older than this are abandoned rather than delivered
/// late. A documented limitation, not a bug.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Maximum response body bytes captured on a delivery record.
pub const MAX_CAPTURED_BODY_BYTES: usize = 1024;
