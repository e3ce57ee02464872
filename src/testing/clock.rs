//! Time source for step timing, retry delays and load test windows

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests, driven by tokio's timer
///
/// `now()` is the start time plus the time elapsed on the tokio clock plus
/// any manual `advance`. Under `#[tokio::test(start_paused = true)]` the
/// runtime jumps straight to the earliest pending timer whenever every task
/// is idle, so concurrent sleepers overlap exactly as they would on a wall
/// clock and no real time passes. Every requested sleep is recorded.
#[derive(Debug)]
pub struct ManualClock {
    start: DateTime<Utc>,
    origin: Instant,
    skew: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            origin: Instant::now(),
            skew: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move virtual time forward without sleeping
    pub fn advance(&self, duration: Duration) {
        let mut skew = self.skew.lock();
        *skew = skew.saturating_add(duration);
    }

    /// Virtual time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed().saturating_add(*self.skew.lock())
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed())
            .ok()
            .and_then(|elapsed| self.start.checked_add_signed(elapsed))
            .unwrap_or(self.start)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::time::sleep(duration).await;
    }
}

/// Milliseconds from `start` to `end`, clamped at zero
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
