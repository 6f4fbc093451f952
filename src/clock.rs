//! Time source used for stagger delays and competition timers.
//!
//! Production code uses [`TokioClock`]. [`ManualClock`] never waits: `sleep` advances its virtual
//! time and records the requested duration, so launch staggering can be tested without wall-clock
//! delays.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Real monotonic clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Virtual clock: time only moves through [`ManualClock::advance`] or `sleep`.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(vec![]),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().expect("poisoned") += duration;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("poisoned").clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().expect("poisoned")
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("poisoned").push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Monotonic stopwatch that can be paused. Paused intervals are not counted.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Stopwatch {
    started: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub(crate) fn start(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    pub(crate) fn stop(&mut self, now: Instant) {
        if let Some(started) = self.started.take() {
            self.accumulated += now.saturating_duration_since(started);
        }
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        self.accumulated
            + self
                .started
                .map(|started| now.saturating_duration_since(started))
                .unwrap_or_default()
    }
}
