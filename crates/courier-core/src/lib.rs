//! Domain models and persistence for the Courier delivery pipeline.
//!
//! Provides strongly-typed identifiers, the destination/event/delivery
//! domain entities, the injectable clock abstraction, and the PostgreSQL
//! repository layer. The delivery engine crate builds on these types and
//! never touches SQL directly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    ActivityEvent, AuthConfig, DeliveryId, DeliveryRecord, DeliveryStatus, Destination,
    DestinationId, EventId, OrgId,
};
pub use time::{Clock, RealClock, TestClock};
