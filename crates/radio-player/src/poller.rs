//! Fixed-interval polling.
//!
//! `start` runs the producer once right away, then every `interval` until
//! `stop`.  The producer must not block: it is expected to spawn whatever
//! work it needs (a metadata fetch) and return.  Ticks never wait for that
//! work to finish, so slow fetches may overlap.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(30_000);

/// tokio intervals cannot have a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

type Producer = Arc<dyn Fn() + Send + Sync>;

pub struct Poller {
    interval: Duration,
    producer: Producer,
    task: Option<AbortHandle>,
}

impl Poller {
    pub fn new<F>(interval: Duration, producer: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            interval: interval.max(MIN_INTERVAL),
            producer: Arc::new(producer),
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// No-op when already running.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        debug!("poller: start every {:?}", self.interval);
        (self.producer)();

        let producer = Arc::clone(&self.producer);
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                producer();
            }
        });
        self.task = Some(task.abort_handle());
    }

    /// Safe to call when not running.  In-flight work spawned by the
    /// producer is not cancelled.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("poller: stop");
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
