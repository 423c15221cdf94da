//! Transaction expiration
//!
//! Two independent sweeps over the transaction metadata store:
//!
//! - the abort sweep, every `abort_timed_out_transaction_check_interval_ms`,
//!   aborts transactions left open past their timeout;
//! - the transactional-id sweep, every
//!   `transactional_id_expiration_check_interval_ms`, deletes ids with no open
//!   transaction that have been idle past `transactional_id_expiration_ms`.
//!
//! Deleting a transactional id is not an abort and does not touch the producer
//! id's partition state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::TransactionCoordinator;
use crate::task::{spawn_sweep, SweepSignal};

#[derive(Debug)]
pub struct TransactionExpirer {
    coordinator: Arc<TransactionCoordinator>,
    abort_interval: Duration,
    expiration_interval: Duration,
    abort_signal: SweepSignal,
    expiration_signal: SweepSignal,
}

impl TransactionExpirer {
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        let config = coordinator.config();
        let abort_interval = config.abort_timed_out_transaction_check_interval();
        let expiration_interval = config.transactional_id_expiration_check_interval();
        Self {
            coordinator,
            abort_interval,
            expiration_interval,
            abort_signal: SweepSignal::new(),
            expiration_signal: SweepSignal::new(),
        }
    }

    /// Run the timed-out transaction sweep once
    pub fn run_abort_sweep(&self) -> usize {
        self.coordinator.abort_timed_out_transactions()
    }

    /// Run the transactional-id sweep once
    pub fn run_expiration_sweep(&self) -> usize {
        self.coordinator.remove_expired_transactional_ids()
    }

    /// Spawn both sweeps; returns the abort task then the expiration task
    pub fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let expirer = Arc::clone(self);
        let abort = spawn_sweep(
            "transaction-timeout-abort",
            self.abort_interval,
            self.abort_signal.clone(),
            move || {
                expirer.run_abort_sweep();
            },
        );

        let expirer = Arc::clone(self);
        let expiration = spawn_sweep(
            "transactional-id-expiration",
            self.expiration_interval,
            self.expiration_signal.clone(),
            move || {
                expirer.run_expiration_sweep();
            },
        );

        (abort, expiration)
    }

    pub fn trigger_abort_sweep(&self) {
        self.abort_signal.trigger();
    }

    pub fn trigger_expiration_sweep(&self) {
        self.expiration_signal.trigger();
    }

    /// Signal shutdown for both sweeps
    pub fn shutdown(&self) {
        self.abort_signal.shutdown();
        self.expiration_signal.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.abort_signal.is_shutdown() && self.expiration_signal.is_shutdown()
    }
}
