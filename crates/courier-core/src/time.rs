//! Injectable clock for deterministic timing.
//!
//! Both background workers sleep between passes and stamp delivery state
//! with wall-clock times. Routing every time read through [`Clock`] lets
//! tests advance time instantly instead of sleeping for real backoff
//! delays.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Clock abstraction for time operations.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to
/// control backoff scheduling and worker pacing deterministically.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for persisted timestamps.
    fn now_system(&self) -> SystemTime;

    /// Current wall-clock time as a chrono timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Sleeps for the specified duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks advance
    /// virtual time and yield immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by system time and tokio sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for tests.
///
/// Time only moves when [`TestClock::advance`] is called or a worker
/// sleeps. Clones share the same underlying time source, so a test can
/// hold one handle while the worker under test holds another.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Nanoseconds advanced since clock creation.
    elapsed_ns: Arc<AtomicU64>,
    /// System time at creation, as nanoseconds since the epoch.
    origin_ns: u64,
    /// Base instant for monotonic readings.
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific system time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        let origin_ns =
            u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);

        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            origin_ns,
            base_instant: Instant::now(),
        }
    }

    /// Advances the clock by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Returns time advanced since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.origin_ns) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping in tests advances virtual time and yields once so other
        // tasks get to run.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
