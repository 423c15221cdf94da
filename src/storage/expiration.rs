//! Producer state expiration
//!
//! Removes per-partition producer entries that have been idle longer than
//! `producer_id_expiration_ms`. This sweep runs on its own timer and never looks
//! at transactional-id metadata: a producer id whose transactional id is still
//! live can lose its partition state, and a producer whose transactional id was
//! removed keeps its partition state until it idles out here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::ProducerStateManager;
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::task::{spawn_sweep, SweepSignal};

/// Periodically expires idle producer state
#[derive(Debug)]
pub struct ProducerStateExpirer {
    state: Arc<ProducerStateManager>,
    clock: Arc<dyn Clock>,
    expiration_ms: i64,
    check_interval: Duration,
    signal: SweepSignal,
    expired_total: AtomicU64,
}

impl ProducerStateExpirer {
    pub fn new(
        state: Arc<ProducerStateManager>,
        clock: Arc<dyn Clock>,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            state,
            clock,
            expiration_ms: config.producer_id_expiration_ms,
            check_interval: config.producer_id_expiration_check_interval(),
            signal: SweepSignal::new(),
            expired_total: AtomicU64::new(0),
        }
    }

    /// Run a single sweep, returning how many entries were removed
    pub fn run_once(&self) -> usize {
        let now = self.clock.now_ms();
        let removed = self.state.remove_expired_producers(now, self.expiration_ms);

        if removed > 0 {
            self.expired_total.fetch_add(removed as u64, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("producer_lifecycle_producers_expired_total").increment(removed as u64);
            info!(
                removed,
                remaining = self.state.producer_count(),
                expiration_ms = self.expiration_ms,
                "Expired idle producer state"
            );
        } else {
            debug!("Producer state sweep found nothing to expire");
        }

        removed
    }

    /// Spawn the periodic sweep on the current tokio runtime
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let expirer = Arc::clone(self);
        spawn_sweep(
            "producer-state-expiration",
            self.check_interval,
            self.signal.clone(),
            move || {
                expirer.run_once();
            },
        )
    }

    /// Trigger an immediate sweep
    pub fn trigger(&self) {
        self.signal.trigger();
    }

    /// Signal shutdown for the sweep task
    pub fn shutdown(&self) {
        self.signal.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_shutdown()
    }

    /// Total entries removed since creation
    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::Relaxed)
    }
}
