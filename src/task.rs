//! Periodic background sweeps
//!
//! Every expiration sweep in the crate runs the same way: a tokio task ticking
//! on a fixed interval that can also be woken early or told to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Wake-up and shutdown signal for one sweep task
#[derive(Debug, Clone, Default)]
pub struct SweepSignal {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SweepSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the sweep now instead of waiting for the next tick
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Stop the task after its current sweep
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Spawn `sweep` on a fixed interval until `signal` is shut down
///
/// The first sweep runs immediately. Missed ticks are skipped rather than
/// replayed in a burst.
pub fn spawn_sweep<F>(
    name: &'static str,
    period: Duration,
    signal: SweepSignal,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            task = name,
            interval_ms = period.as_millis() as u64,
            "Sweep task started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = signal.notify.notified() => {}
            }
            if signal.is_shutdown() {
                info!(task = name, "Sweep task shutting down");
                break;
            }
            sweep();
        }

        info!(task = name, "Sweep task stopped");
    })
}
