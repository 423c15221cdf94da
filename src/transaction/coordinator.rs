//! Transaction coordinator for managing transaction state
//!
//! The TransactionCoordinator is responsible for:
//! - Mapping transactional ids to producer id/epoch pairs
//! - Driving the transaction state machine for enlist, commit and abort
//! - Aborting transactions that outlive their timeout
//! - Removing transactional ids that have sat idle too long
//!
//! # Concurrency
//!
//! Each transactional id is guarded by its `DashMap` entry lock, so transitions
//! for one id are serialized while different ids proceed in parallel.
//!
//! Marker writes happen with the entry unlocked. Before the lock is released
//! the entry is moved to `PrepareCommit` or `PrepareAbort`; any request that
//! observes a `Prepare*` state fails with `ConcurrentTransactions` instead of
//! waiting. Once markers are written the entry is re-locked and moved to the
//! matching `Complete*` state, provided nobody completed it in the meantime.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
#[cfg(feature = "metrics")]
use metrics::counter;
use tracing::{debug, info, warn};

use super::markers::TxnMarkerWriter;
use super::state::{TransactionMetadata, TransactionResult, TransactionState};
use super::store::{TransactionFilter, TransactionListing, TransactionMetadataStore};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::storage::{ProducerEpoch, ProducerId, ProducerIdManager, TopicPartition};

/// Markers to write for a transaction that was just moved to `Prepare*`
#[derive(Debug)]
struct PendingCompletion {
    producer_id: ProducerId,
    producer_epoch: ProducerEpoch,
    result: TransactionResult,
    partitions: Vec<TopicPartition>,
    next_producer_id: Option<ProducerId>,
}

impl PendingCompletion {
    fn from_metadata(txn: &TransactionMetadata, result: TransactionResult) -> Self {
        Self {
            producer_id: txn.producer_id,
            producer_epoch: txn.producer_epoch,
            result,
            partitions: txn.partitions.iter().cloned().collect(),
            next_producer_id: txn.next_producer_id,
        }
    }
}

/// Counters for coordinator activity
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Number of transactions that timed out
    pub timeouts_total: AtomicU64,
    /// Number of producers fenced due to timeout
    pub producers_fenced: AtomicU64,
    /// Number of successful marker writes
    pub markers_written: AtomicU64,
    /// Number of failed marker writes
    pub marker_failures: AtomicU64,
    /// Number of transactional ids removed for idleness
    pub transactional_ids_expired: AtomicU64,
}

impl TransactionStats {
    fn record_timeout(&self) {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("producer_lifecycle_transaction_timeouts_total").increment(1);
    }

    fn record_producer_fenced(&self) {
        self.producers_fenced.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("producer_lifecycle_producers_fenced_total").increment(1);
    }

    fn record_markers(&self, ok: bool) {
        if ok {
            self.markers_written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.marker_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_expired(&self, count: usize) {
        self.transactional_ids_expired
            .fetch_add(count as u64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("producer_lifecycle_transactional_ids_expired_total").increment(count as u64);
    }

    /// (timeouts, fenced, markers written, marker failures, ids expired)
    pub fn get_stats(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.timeouts_total.load(Ordering::Relaxed),
            self.producers_fenced.load(Ordering::Relaxed),
            self.markers_written.load(Ordering::Relaxed),
            self.marker_failures.load(Ordering::Relaxed),
            self.transactional_ids_expired.load(Ordering::Relaxed),
        )
    }
}

/// Transaction coordinator manages all transactional ids
#[derive(Debug)]
pub struct TransactionCoordinator {
    store: TransactionMetadataStore,
    producer_ids: Arc<ProducerIdManager>,
    marker_writer: Arc<dyn TxnMarkerWriter>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    stats: TransactionStats,
}

impl TransactionCoordinator {
    pub fn new(
        config: LifecycleConfig,
        producer_ids: Arc<ProducerIdManager>,
        marker_writer: Arc<dyn TxnMarkerWriter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: TransactionMetadataStore::new(),
            producer_ids,
            marker_writer,
            clock,
            config,
            stats: TransactionStats::default(),
        }
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn validate_timeout(&self, timeout_ms: i64) -> Result<()> {
        if timeout_ms < 1 || timeout_ms > self.config.transaction_max_timeout_ms {
            return Err(LifecycleError::InvalidTransactionTimeout {
                timeout_ms,
                max_ms: self.config.transaction_max_timeout_ms,
            });
        }
        Ok(())
    }

    /// Assign or re-assign the producer id for a transactional id
    ///
    /// A new id starts at epoch 0. An existing id gets its epoch bumped, which
    /// fences any older producer instance. An `Ongoing` transaction is aborted
    /// first. When the epoch is exhausted a new producer id is allocated.
    pub fn init_producer_id(
        &self,
        transactional_id: &str,
        transaction_timeout_ms: Option<i64>,
    ) -> Result<(ProducerId, ProducerEpoch)> {
        let timeout_ms = transaction_timeout_ms.unwrap_or(self.config.default_transaction_timeout_ms);
        self.validate_timeout(timeout_ms)?;
        let now = self.clock.now_ms();

        let pending = match self.store.entry(transactional_id) {
            Entry::Vacant(vacant) => {
                let producer_id = self.producer_ids.next_producer_id();
                vacant.insert(TransactionMetadata::new(
                    transactional_id,
                    producer_id,
                    0,
                    timeout_ms,
                    now,
                ));
                info!(
                    transactional_id,
                    producer_id,
                    producer_epoch = 0,
                    "Assigned producer id to new transactional id"
                );
                return Ok((producer_id, 0));
            }
            Entry::Occupied(mut occupied) => {
                let txn = occupied.get_mut();
                let state = txn.state;
                match state {
                    state if state.is_preparing() => {
                        return Err(LifecycleError::concurrent(transactional_id, state));
                    }
                    TransactionState::Ongoing => {
                        // Fence the current instance, then abort its transaction.
                        // Markers keep the old producer id so its records resolve.
                        let old_epoch = txn.producer_epoch;
                        if txn.bump_epoch() {
                            txn.next_producer_id = Some(self.producer_ids.next_producer_id());
                        }
                        txn.transaction_timeout_ms = timeout_ms;
                        txn.transition_to(TransactionState::PrepareAbort, now)?;
                        warn!(
                            transactional_id,
                            producer_id = txn.producer_id,
                            old_epoch,
                            new_epoch = txn.producer_epoch,
                            next_producer_id = txn.next_producer_id,
                            "Aborting ongoing transaction on producer re-initialization"
                        );
                        PendingCompletion::from_metadata(txn, TransactionResult::Abort)
                    }
                    _ => {
                        let old_producer_id = txn.producer_id;
                        let old_epoch = txn.producer_epoch;
                        if txn.bump_epoch() {
                            txn.producer_id = self.producer_ids.next_producer_id();
                            txn.producer_epoch = 0;
                        }
                        txn.transaction_timeout_ms = timeout_ms;
                        txn.transition_to(TransactionState::Empty, now)?;
                        info!(
                            transactional_id,
                            old_producer_id,
                            old_epoch,
                            producer_id = txn.producer_id,
                            producer_epoch = txn.producer_epoch,
                            "Re-initialized transactional producer"
                        );
                        return Ok((txn.producer_id, txn.producer_epoch));
                    }
                }
            }
        };

        let (producer_id, producer_epoch) = match pending.next_producer_id {
            Some(next) => (next, 0),
            None => (pending.producer_id, pending.producer_epoch),
        };
        if !self.write_markers_and_complete(transactional_id, pending)? {
            return Err(LifecycleError::concurrent(
                transactional_id,
                TransactionState::PrepareAbort,
            ));
        }

        let mut txn = self.store.get_mut(transactional_id)?;
        if txn.producer_id != producer_id
            || txn.producer_epoch != producer_epoch
            || txn.state != TransactionState::CompleteAbort
        {
            return Err(LifecycleError::concurrent(transactional_id, txn.state));
        }
        txn.transition_to(TransactionState::Empty, self.clock.now_ms())?;
        Ok((producer_id, producer_epoch))
    }

    /// Enlist partitions in the transaction, moving it to `Ongoing`
    pub fn add_partitions_to_txn(
        &self,
        transactional_id: &str,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        partitions: &[TopicPartition],
    ) -> Result<()> {
        if partitions.is_empty() {
            return Err(LifecycleError::InvalidRequest(format!(
                "no partitions to add for {}",
                transactional_id
            )));
        }
        let now = self.clock.now_ms();

        let mut txn = self.store.get_mut(transactional_id)?;
        txn.check_producer(producer_id, producer_epoch)?;
        if !txn.state.can_add_partitions() {
            return Err(LifecycleError::concurrent(transactional_id, txn.state));
        }
        if txn.state.is_complete() {
            txn.transition_to(TransactionState::Empty, now)?;
        }
        txn.transition_to(TransactionState::Ongoing, now)?;

        let before = txn.partitions.len();
        txn.partitions.extend(partitions.iter().cloned());
        debug!(
            transactional_id,
            producer_id,
            producer_epoch,
            added = txn.partitions.len() - before,
            total = txn.partitions.len(),
            "Added partitions to transaction"
        );
        Ok(())
    }

    /// Commit or abort the ongoing transaction
    ///
    /// Returns once the transaction is in `Prepare*`. If markers could be
    /// written it is already `Complete*`; otherwise the timeout sweep finishes
    /// it later. Repeating a request that already completed with the same
    /// outcome succeeds.
    pub fn end_txn(
        &self,
        transactional_id: &str,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        result: TransactionResult,
    ) -> Result<()> {
        let now = self.clock.now_ms();

        let pending = {
            let mut txn = self.store.get_mut(transactional_id)?;
            txn.check_producer(producer_id, producer_epoch)?;
            let state = txn.state;
            match state {
                TransactionState::Ongoing => {
                    txn.transition_to(result.prepare_state(), now)?;
                    PendingCompletion::from_metadata(&txn, result)
                }
                state if state.is_preparing() => {
                    return Err(LifecycleError::concurrent(transactional_id, state));
                }
                state if state == result.complete_state() => {
                    debug!(
                        transactional_id,
                        producer_id,
                        %result,
                        "Transaction already completed with requested outcome"
                    );
                    return Ok(());
                }
                state => {
                    return Err(LifecycleError::InvalidTransactionState {
                        transactional_id: transactional_id.to_string(),
                        from: state,
                        to: result.prepare_state(),
                    });
                }
            }
        };

        info!(
            transactional_id,
            producer_id,
            producer_epoch,
            %result,
            partition_count = pending.partitions.len(),
            "Ending transaction"
        );
        self.write_markers_and_complete(transactional_id, pending)?;
        Ok(())
    }

    /// Write markers with the entry unlocked, then move `Prepare*` to
    /// `Complete*`. Returns false when the markers could not be written or the
    /// entry was completed by someone else first.
    fn write_markers_and_complete(
        &self,
        transactional_id: &str,
        pending: PendingCompletion,
    ) -> Result<bool> {
        let PendingCompletion {
            producer_id,
            producer_epoch,
            result,
            partitions,
            ..
        } = pending;

        if let Err(e) =
            self.marker_writer
                .write_markers(producer_id, producer_epoch, result, &partitions)
        {
            self.stats.record_markers(false);
            warn!(
                transactional_id,
                producer_id,
                producer_epoch,
                %result,
                error = %e,
                "Failed to write transaction markers, completion deferred"
            );
            return Ok(false);
        }
        self.stats.record_markers(true);

        let mut txn = self.store.get_mut(transactional_id)?;
        if txn.producer_id != producer_id
            || txn.producer_epoch != producer_epoch
            || txn.state != result.prepare_state()
        {
            debug!(
                transactional_id,
                producer_id,
                state = %txn.state,
                "Transaction completed concurrently"
            );
            return Ok(false);
        }
        txn.transition_to(result.complete_state(), self.clock.now_ms())?;
        debug!(
            transactional_id,
            producer_id,
            producer_epoch,
            state = %txn.state,
            "Transaction completed"
        );
        Ok(true)
    }

    /// Abort every `Ongoing` transaction idle past its timeout and re-drive
    /// `Prepare*` transactions whose markers never landed
    ///
    /// Returns the number of transactions brought to a completed state.
    pub fn abort_timed_out_transactions(&self) -> usize {
        let now = self.clock.now_ms();
        let mut completed = 0;

        for transactional_id in self.store.timed_out(now) {
            let pending = {
                let mut txn = match self.store.get_mut(&transactional_id) {
                    Ok(txn) => txn,
                    Err(_) => continue,
                };
                let state = txn.state;
                if !state.is_in_progress() || !txn.is_timed_out(now) {
                    continue;
                }

                match state {
                    TransactionState::Ongoing => {
                        let old_epoch = txn.producer_epoch;
                        if self.config.fence_producer_on_timeout {
                            if txn.bump_epoch() {
                                txn.next_producer_id = Some(self.producer_ids.next_producer_id());
                            }
                            self.stats.record_producer_fenced();
                        }
                        if txn.transition_to(TransactionState::PrepareAbort, now).is_err() {
                            continue;
                        }
                        warn!(
                            transactional_id = %transactional_id,
                            producer_id = txn.producer_id,
                            old_epoch,
                            new_epoch = txn.producer_epoch,
                            next_producer_id = txn.next_producer_id,
                            timeout_ms = txn.transaction_timeout_ms,
                            partition_count = txn.partitions.len(),
                            "Aborting timed-out transaction"
                        );
                        PendingCompletion::from_metadata(&txn, TransactionResult::Abort)
                    }
                    _ => {
                        let Some(result) = TransactionResult::of_state(state) else {
                            continue;
                        };
                        // Pending markers are retried at most once per timeout
                        txn.last_update_timestamp = now;
                        warn!(
                            transactional_id = %transactional_id,
                            producer_id = txn.producer_id,
                            %result,
                            "Retrying completion of pending transaction"
                        );
                        PendingCompletion::from_metadata(&txn, result)
                    }
                }
            };

            self.stats.record_timeout();
            match self.write_markers_and_complete(&transactional_id, pending) {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    transactional_id = %transactional_id,
                    error = %e,
                    "Failed to complete timed-out transaction"
                ),
            }
        }

        if completed > 0 {
            info!(completed, "Completed timed-out transactions");
        }
        completed
    }

    /// Remove transactional ids in `Empty` or `Complete*` idle past
    /// `transactional_id_expiration_ms`
    ///
    /// The producer ids they mapped to keep their partition state; it expires
    /// on its own timer.
    pub fn remove_expired_transactional_ids(&self) -> usize {
        let now = self.clock.now_ms();
        let removed = self
            .store
            .remove_expired(now, self.config.transactional_id_expiration_ms);

        if !removed.is_empty() {
            self.stats.record_expired(removed.len());
            for txn in &removed {
                info!(
                    transactional_id = %txn.transactional_id,
                    producer_id = txn.producer_id,
                    producer_epoch = txn.producer_epoch,
                    state = %txn.state,
                    idle_ms = now - txn.last_update_timestamp,
                    "Expired transactional id"
                );
            }
        }
        removed.len()
    }

    /// Snapshot of one transactional id
    pub fn describe_transaction(&self, transactional_id: &str) -> Result<TransactionMetadata> {
        self.store
            .describe(transactional_id)
            .ok_or_else(|| LifecycleError::TransactionalIdNotFound(transactional_id.to_string()))
    }

    /// Transactional ids matching `filter`
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Vec<TransactionListing> {
        self.store.list(filter)
    }

    /// Partitions enlisted in the current transaction
    pub fn enlisted_partitions(&self, transactional_id: &str) -> Result<BTreeSet<TopicPartition>> {
        Ok(self.describe_transaction(transactional_id)?.partitions)
    }

    pub fn transactional_id_count(&self) -> usize {
        self.store.len()
    }

    /// Milliseconds left before an in-progress transaction times out
    pub fn remaining_timeout_ms(&self, transactional_id: &str) -> Option<i64> {
        let txn = self.store.describe(transactional_id)?;
        if !txn.state.is_in_progress() {
            return None;
        }
        let elapsed = self.clock.now_ms() - txn.last_update_timestamp;
        Some((txn.transaction_timeout_ms - elapsed).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transaction::NoopMarkerWriter;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingWriter {
        fail: Mutex<bool>,
        calls: Mutex<Vec<(ProducerId, ProducerEpoch, TransactionResult, Vec<TopicPartition>)>>,
    }

    impl TxnMarkerWriter for RecordingWriter {
        fn write_markers(
            &self,
            producer_id: ProducerId,
            producer_epoch: ProducerEpoch,
            result: TransactionResult,
            partitions: &[TopicPartition],
        ) -> Result<()> {
            if *self.fail.lock() {
                return Err(LifecycleError::MarkerWrite("partition offline".to_string()));
            }
            self.calls
                .lock()
                .push((producer_id, producer_epoch, result, partitions.to_vec()));
            Ok(())
        }
    }

    fn create_test_coordinator() -> (TransactionCoordinator, Arc<ManualClock>, Arc<RecordingWriter>) {
        let clock = Arc::new(ManualClock::new(0));
        let writer = Arc::new(RecordingWriter::default());
        let coordinator = TransactionCoordinator::new(
            LifecycleConfig::default().with_transactional_id_expiration(500, 500),
            Arc::new(ProducerIdManager::new(1000)),
            writer.clone(),
            clock.clone(),
        );
        (coordinator, clock, writer)
    }

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("orders", partition)
    }

    #[test]
    fn test_init_new_transactional_id() {
        let (coordinator, _, _) = create_test_coordinator();
        assert_eq!(coordinator.init_producer_id("txn-1", None).unwrap(), (1000, 0));
        assert_eq!(coordinator.init_producer_id("txn-2", None).unwrap(), (1001, 0));

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::Empty);
        assert_eq!(txn.transaction_timeout_ms, 60_000);
    }

    #[test]
    fn test_reinit_bumps_epoch() {
        let (coordinator, _, _) = create_test_coordinator();
        coordinator.init_producer_id("txn-1", None).unwrap();
        assert_eq!(coordinator.init_producer_id("txn-1", None).unwrap(), (1000, 1));
        assert_eq!(coordinator.init_producer_id("txn-1", Some(5_000)).unwrap(), (1000, 2));
        assert_eq!(
            coordinator.describe_transaction("txn-1").unwrap().transaction_timeout_ms,
            5_000
        );
    }

    #[test]
    fn test_init_rejects_bad_timeout() {
        let (coordinator, _, _) = create_test_coordinator();
        for timeout in [0, -5, 900_001] {
            assert!(matches!(
                coordinator.init_producer_id("txn-1", Some(timeout)),
                Err(LifecycleError::InvalidTransactionTimeout { .. })
            ));
        }
        assert_eq!(coordinator.transactional_id_count(), 0);
    }

    #[test]
    fn test_epoch_exhaustion_allocates_new_producer_id() {
        let (coordinator, _, _) = create_test_coordinator();
        coordinator.init_producer_id("txn-1", None).unwrap();
        coordinator.store.get_mut("txn-1").unwrap().producer_epoch = ProducerEpoch::MAX - 1;

        assert_eq!(coordinator.init_producer_id("txn-1", None).unwrap(), (1001, 0));
    }

    #[test]
    fn test_epoch_exhaustion_while_ongoing_fences_old_instance() {
        let (coordinator, _, writer) = create_test_coordinator();
        let (pid, _) = coordinator.init_producer_id("txn-1", None).unwrap();
        let exhausted = ProducerEpoch::MAX - 1;
        coordinator.store.get_mut("txn-1").unwrap().producer_epoch = exhausted;
        coordinator
            .add_partitions_to_txn("txn-1", pid, exhausted, &[tp(0)])
            .unwrap();

        let first = coordinator.init_producer_id("txn-1", None).unwrap();
        assert_eq!(first, (1001, 0));

        // Abort markers go out under the identity that wrote the records
        {
            let calls = writer.calls.lock();
            assert_eq!(calls.len(), 1);
            assert_eq!((calls[0].0, calls[0].1), (pid, exhausted));
            assert_eq!(calls[0].2, TransactionResult::Abort);
        }

        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid, exhausted, &[tp(0)]),
            Err(LifecycleError::InvalidProducerIdMapping { .. })
        ));

        coordinator
            .add_partitions_to_txn("txn-1", first.0, first.1, &[tp(0)])
            .unwrap();
        let second = coordinator.init_producer_id("txn-1", None).unwrap();
        assert_eq!(second, (1001, 1));
        assert_ne!(first, second);

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::Empty);
        assert_eq!(txn.next_producer_id, None);
    }

    #[test]
    fn test_epoch_exhaustion_on_timeout_allocates_new_producer_id() {
        let (coordinator, clock, writer) = create_test_coordinator();
        let (pid, _) = coordinator.init_producer_id("txn-1", Some(1_000)).unwrap();
        let exhausted = ProducerEpoch::MAX - 1;
        coordinator.store.get_mut("txn-1").unwrap().producer_epoch = exhausted;
        coordinator
            .add_partitions_to_txn("txn-1", pid, exhausted, &[tp(0)])
            .unwrap();

        clock.advance(1_001);
        assert_eq!(coordinator.abort_timed_out_transactions(), 1);

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::CompleteAbort);
        assert_eq!((txn.producer_id, txn.producer_epoch), (1001, 0));
        assert_eq!(writer.calls.lock()[0].0, pid);
        assert_eq!(writer.calls.lock()[0].1, exhausted);

        assert!(matches!(
            coordinator.end_txn("txn-1", pid, exhausted, TransactionResult::Commit),
            Err(LifecycleError::InvalidProducerIdMapping { .. })
        ));
        let (_, fenced, _, _, _) = coordinator.stats().get_stats();
        assert_eq!(fenced, 1);
    }

    #[test]
    fn test_commit_cycle() {
        let (coordinator, _, writer) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();

        coordinator
            .add_partitions_to_txn("txn-1", pid, epoch, &[tp(0), tp(1)])
            .unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(1)]).unwrap();
        assert_eq!(coordinator.enlisted_partitions("txn-1").unwrap().len(), 2);

        coordinator
            .end_txn("txn-1", pid, epoch, TransactionResult::Commit)
            .unwrap();

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::CompleteCommit);
        assert!(txn.partitions.is_empty());

        let calls = writer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, TransactionResult::Commit);
        assert_eq!(calls[0].3, vec![tp(0), tp(1)]);
    }

    #[test]
    fn test_end_txn_retry_is_idempotent() {
        let (coordinator, _, writer) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();
        coordinator
            .end_txn("txn-1", pid, epoch, TransactionResult::Abort)
            .unwrap();

        coordinator
            .end_txn("txn-1", pid, epoch, TransactionResult::Abort)
            .unwrap();
        assert_eq!(writer.calls.lock().len(), 1);

        assert!(matches!(
            coordinator.end_txn("txn-1", pid, epoch, TransactionResult::Commit),
            Err(LifecycleError::InvalidTransactionState {
                from: TransactionState::CompleteAbort,
                ..
            })
        ));
    }

    #[test]
    fn test_end_txn_without_partitions_is_invalid() {
        let (coordinator, _, _) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        assert!(matches!(
            coordinator.end_txn("txn-1", pid, epoch, TransactionResult::Commit),
            Err(LifecycleError::InvalidTransactionState {
                from: TransactionState::Empty,
                to: TransactionState::PrepareCommit,
                ..
            })
        ));
    }

    #[test]
    fn test_add_partitions_validation() {
        let (coordinator, _, _) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();

        assert!(matches!(
            coordinator.add_partitions_to_txn("unknown", pid, epoch, &[tp(0)]),
            Err(LifecycleError::TransactionalIdNotFound(_))
        ));
        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid + 1, epoch, &[tp(0)]),
            Err(LifecycleError::InvalidProducerIdMapping { .. })
        ));
        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid, epoch + 1, &[tp(0)]),
            Err(LifecycleError::InvalidProducerEpoch { .. })
        ));
        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[]),
            Err(LifecycleError::InvalidRequest(_))
        ));
        assert_eq!(
            coordinator.describe_transaction("txn-1").unwrap().state,
            TransactionState::Empty
        );
    }

    #[test]
    fn test_reinit_fences_old_producer() {
        let (coordinator, _, _) = create_test_coordinator();
        let (pid, old_epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        let (_, new_epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        assert!(new_epoch > old_epoch);

        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid, old_epoch, &[tp(0)]),
            Err(LifecycleError::InvalidProducerEpoch { .. })
        ));
    }

    #[test]
    fn test_reinit_aborts_ongoing_transaction() {
        let (coordinator, _, writer) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();

        let (new_pid, new_epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        assert_eq!(new_pid, pid);
        assert_eq!(new_epoch, epoch + 1);

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::Empty);
        assert!(txn.partitions.is_empty());

        let calls = writer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, new_epoch);
        assert_eq!(calls[0].2, TransactionResult::Abort);
    }

    #[test]
    fn test_marker_failure_leaves_transaction_pending() {
        let (coordinator, clock, writer) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", Some(1_000)).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();

        *writer.fail.lock() = true;
        coordinator
            .end_txn("txn-1", pid, epoch, TransactionResult::Commit)
            .unwrap();
        assert_eq!(
            coordinator.describe_transaction("txn-1").unwrap().state,
            TransactionState::PrepareCommit
        );

        // Every request sees the transition in flight
        assert!(matches!(
            coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(1)]),
            Err(LifecycleError::ConcurrentTransactions(_))
        ));
        assert!(matches!(
            coordinator.end_txn("txn-1", pid, epoch, TransactionResult::Commit),
            Err(LifecycleError::ConcurrentTransactions(_))
        ));
        assert!(matches!(
            coordinator.init_producer_id("txn-1", None),
            Err(LifecycleError::ConcurrentTransactions(_))
        ));

        // Not yet timed out
        clock.advance(1_000);
        assert_eq!(coordinator.abort_timed_out_transactions(), 0);

        // Still failing: retried but stays pending
        clock.advance(1);
        assert_eq!(coordinator.abort_timed_out_transactions(), 0);
        assert_eq!(
            coordinator.describe_transaction("txn-1").unwrap().state,
            TransactionState::PrepareCommit
        );

        *writer.fail.lock() = false;
        clock.advance(1_001);
        assert_eq!(coordinator.abort_timed_out_transactions(), 1);
        assert_eq!(
            coordinator.describe_transaction("txn-1").unwrap().state,
            TransactionState::CompleteCommit
        );
        assert_eq!(writer.calls.lock()[0].2, TransactionResult::Commit);
    }

    #[test]
    fn test_timeout_aborts_and_fences() {
        let (coordinator, clock, writer) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", Some(1_000)).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();
        assert_eq!(coordinator.remaining_timeout_ms("txn-1"), Some(1_000));

        clock.advance(1_001);
        assert_eq!(coordinator.abort_timed_out_transactions(), 1);

        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::CompleteAbort);
        assert_eq!(txn.producer_epoch, epoch + 1);
        assert_eq!(writer.calls.lock()[0].1, epoch + 1);

        let (timeouts, fenced, _, _, _) = coordinator.stats().get_stats();
        assert_eq!((timeouts, fenced), (1, 1));

        // The fenced instance can't continue
        assert!(matches!(
            coordinator.end_txn("txn-1", pid, epoch, TransactionResult::Commit),
            Err(LifecycleError::InvalidProducerEpoch { .. })
        ));
    }

    #[test]
    fn test_timeout_without_fencing_keeps_epoch() {
        let clock = Arc::new(ManualClock::new(0));
        let coordinator = TransactionCoordinator::new(
            LifecycleConfig::default().with_fence_on_timeout(false),
            Arc::new(ProducerIdManager::new(1)),
            Arc::new(NoopMarkerWriter),
            clock.clone(),
        );
        let (pid, epoch) = coordinator.init_producer_id("txn-1", Some(100)).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();

        clock.advance(101);
        assert_eq!(coordinator.abort_timed_out_transactions(), 1);
        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.producer_epoch, epoch);
        assert_eq!(txn.state, TransactionState::CompleteAbort);
    }

    #[test]
    fn test_remove_expired_transactional_ids() {
        let (coordinator, clock, _) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("idle", None).unwrap();
        coordinator.init_producer_id("busy", None).unwrap();
        let (busy_pid, busy_epoch) = coordinator.init_producer_id("busy", None).unwrap();
        coordinator
            .add_partitions_to_txn("busy", busy_pid, busy_epoch, &[tp(0)])
            .unwrap();

        clock.advance(501);
        assert_eq!(coordinator.remove_expired_transactional_ids(), 1);
        assert!(matches!(
            coordinator.add_partitions_to_txn("idle", pid, epoch, &[tp(0)]),
            Err(LifecycleError::TransactionalIdNotFound(_))
        ));
        assert!(coordinator.describe_transaction("busy").is_ok());
        assert_eq!(coordinator.stats().get_stats().4, 1);

        // A removed id is recreated with a fresh producer id
        let (new_pid, new_epoch) = coordinator.init_producer_id("idle", None).unwrap();
        assert_ne!(new_pid, pid);
        assert_eq!(new_epoch, 0);
    }

    #[test]
    fn test_complete_transaction_resets_on_reuse() {
        let (coordinator, _, _) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("txn-1", None).unwrap();
        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(0)]).unwrap();
        coordinator
            .end_txn("txn-1", pid, epoch, TransactionResult::Commit)
            .unwrap();

        coordinator.add_partitions_to_txn("txn-1", pid, epoch, &[tp(2)]).unwrap();
        let txn = coordinator.describe_transaction("txn-1").unwrap();
        assert_eq!(txn.state, TransactionState::Ongoing);
        assert_eq!(txn.partitions.iter().cloned().collect::<Vec<_>>(), vec![tp(2)]);
    }

    #[test]
    fn test_list_transactions() {
        let (coordinator, _, _) = create_test_coordinator();
        let (pid, epoch) = coordinator.init_producer_id("a", None).unwrap();
        coordinator.init_producer_id("b", None).unwrap();
        coordinator.add_partitions_to_txn("a", pid, epoch, &[tp(0)]).unwrap();

        let ongoing = coordinator
            .list_transactions(&TransactionFilter::default().with_states([TransactionState::Ongoing]));
        assert_eq!(ongoing.len(), 1);
        assert_eq!(ongoing[0].transactional_id, "a");
        assert_eq!(coordinator.list_transactions(&TransactionFilter::default()).len(), 2);
    }
}
