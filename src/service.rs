//! Producer identity service
//!
//! Entry point for client requests that touch producer identity. It routes
//! each request to the store that owns it:
//!
//! - produce writes go to the per-partition [`ProducerStateManager`];
//! - InitProducerId, AddPartitionsToTxn and EndTxn go to the
//!   [`TransactionCoordinator`].
//!
//! The two stores are never updated together. A transactional id can expire
//! while its producer id still has live partition state: writes from that
//! producer keep being accepted, but AddPartitionsToTxn for the id fails with
//! `TransactionalIdNotFound` until the client calls InitProducerId again.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::storage::{
    ProducerEpoch, ProducerId, ProducerIdManager, ProducerStateEntry, ProducerStateExpirer,
    ProducerStateManager, SequenceNumber, TopicPartition,
};
use crate::transaction::{
    NoopMarkerWriter, TransactionCoordinator, TransactionExpirer, TransactionFilter,
    TransactionListing, TransactionMetadata, TransactionResult, TxnMarkerWriter,
};

/// Handle to the running sweep tasks
#[derive(Debug)]
pub struct BackgroundTasks {
    producer_expirer: Arc<ProducerStateExpirer>,
    transaction_expirer: Arc<TransactionExpirer>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal every sweep to stop
    pub fn shutdown(&self) {
        self.producer_expirer.shutdown();
        self.transaction_expirer.shutdown();
    }

    /// Signal shutdown and wait for the tasks to exit
    pub async fn shutdown_and_wait(self) {
        self.shutdown();
        for handle in self.handles {
            // A panicked sweep has already stopped
            let _ = handle.await;
        }
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }
}

#[derive(Debug)]
pub struct ProducerIdentityService {
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    producer_ids: Arc<ProducerIdManager>,
    producer_state: Arc<ProducerStateManager>,
    coordinator: Arc<TransactionCoordinator>,
    producer_expirer: Arc<ProducerStateExpirer>,
    transaction_expirer: Arc<TransactionExpirer>,
}

impl ProducerIdentityService {
    /// Service on the system clock with no marker destination
    pub fn new(config: LifecycleConfig) -> Result<Self> {
        Self::with_components(config, Arc::new(SystemClock), Arc::new(NoopMarkerWriter))
    }

    pub fn with_components(
        config: LifecycleConfig,
        clock: Arc<dyn Clock>,
        marker_writer: Arc<dyn TxnMarkerWriter>,
    ) -> Result<Self> {
        config.validate()?;

        let producer_ids = Arc::new(ProducerIdManager::new(config.first_producer_id));
        let producer_state = Arc::new(ProducerStateManager::new());
        let coordinator = Arc::new(TransactionCoordinator::new(
            config.clone(),
            Arc::clone(&producer_ids),
            marker_writer,
            Arc::clone(&clock),
        ));
        let producer_expirer = Arc::new(ProducerStateExpirer::new(
            Arc::clone(&producer_state),
            Arc::clone(&clock),
            &config,
        ));
        let transaction_expirer = Arc::new(TransactionExpirer::new(Arc::clone(&coordinator)));

        Ok(Self {
            config,
            clock,
            producer_ids,
            producer_state,
            coordinator,
            producer_expirer,
            transaction_expirer,
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Assign a producer id
    ///
    /// Without a transactional id this is an idempotent-only producer and
    /// always gets a fresh id at epoch 0.
    pub fn init_producer_id(
        &self,
        transactional_id: Option<&str>,
        transaction_timeout_ms: Option<i64>,
    ) -> Result<(ProducerId, ProducerEpoch)> {
        match transactional_id {
            Some(transactional_id) => self
                .coordinator
                .init_producer_id(transactional_id, transaction_timeout_ms),
            None => {
                let producer_id = self.producer_ids.next_producer_id();
                info!(producer_id, "Assigned idempotent producer id");
                Ok((producer_id, 0))
            }
        }
    }

    pub fn add_partitions_to_txn(
        &self,
        transactional_id: &str,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        partitions: &[TopicPartition],
    ) -> Result<()> {
        self.coordinator
            .add_partitions_to_txn(transactional_id, producer_id, producer_epoch, partitions)
    }

    pub fn end_txn(
        &self,
        transactional_id: &str,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        result: TransactionResult,
    ) -> Result<()> {
        self.coordinator
            .end_txn(transactional_id, producer_id, producer_epoch, result)
    }

    /// Gate a single-record write on the partition's producer state
    pub fn produce(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        sequence: SequenceNumber,
    ) -> Result<ProducerStateEntry> {
        self.producer_state.record_write(
            partition,
            producer_id,
            producer_epoch,
            sequence,
            self.clock.now_ms(),
        )
    }

    /// Gate a batch of `record_count` records starting at `first_sequence`
    pub fn produce_batch(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        first_sequence: SequenceNumber,
        record_count: i32,
    ) -> Result<ProducerStateEntry> {
        self.producer_state.record_batch(
            partition,
            producer_id,
            producer_epoch,
            first_sequence,
            record_count,
            self.clock.now_ms(),
        )
    }

    pub fn describe_producers(&self, partition: &TopicPartition) -> Vec<ProducerStateEntry> {
        self.producer_state.describe(partition)
    }

    pub fn describe_transaction(&self, transactional_id: &str) -> Result<TransactionMetadata> {
        self.coordinator.describe_transaction(transactional_id)
    }

    pub fn list_transactions(&self, filter: &TransactionFilter) -> Vec<TransactionListing> {
        self.coordinator.list_transactions(filter)
    }

    /// Run one producer state expiration sweep now
    pub fn expire_producers(&self) -> usize {
        self.producer_expirer.run_once()
    }

    /// Run one transactional-id expiration sweep now
    pub fn expire_transactional_ids(&self) -> usize {
        self.transaction_expirer.run_expiration_sweep()
    }

    /// Run one timed-out transaction sweep now
    pub fn abort_timed_out_transactions(&self) -> usize {
        self.transaction_expirer.run_abort_sweep()
    }

    /// Spawn the producer state, transactional-id and transaction timeout
    /// sweeps on the current tokio runtime
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let producer_handle = self.producer_expirer.start();
        let (abort_handle, expiration_handle) = self.transaction_expirer.start();
        info!(
            producer_id_check_interval_ms = self.config.producer_id_expiration_check_interval_ms,
            transactional_id_check_interval_ms =
                self.config.transactional_id_expiration_check_interval_ms,
            abort_check_interval_ms = self.config.abort_timed_out_transaction_check_interval_ms,
            "Started producer lifecycle background tasks"
        );

        BackgroundTasks {
            producer_expirer: Arc::clone(&self.producer_expirer),
            transaction_expirer: Arc::clone(&self.transaction_expirer),
            handles: vec![producer_handle, abort_handle, expiration_handle],
        }
    }

    pub fn producer_state(&self) -> &Arc<ProducerStateManager> {
        &self.producer_state
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LifecycleError;

    fn service() -> (ProducerIdentityService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let service = ProducerIdentityService::with_components(
            LifecycleConfig::default(),
            clock.clone(),
            Arc::new(NoopMarkerWriter),
        )
        .unwrap();
        (service, clock)
    }

    #[test]
    fn test_idempotent_producer_gets_fresh_ids() {
        let (service, _) = service();
        assert_eq!(service.init_producer_id(None, None).unwrap(), (1000, 0));
        assert_eq!(service.init_producer_id(None, None).unwrap(), (1001, 0));
        assert_eq!(service.list_transactions(&TransactionFilter::default()).len(), 0);
    }

    #[test]
    fn test_transactional_and_idempotent_ids_share_allocator() {
        let (service, _) = service();
        let (a, _) = service.init_producer_id(None, None).unwrap();
        let (b, _) = service.init_producer_id(Some("txn"), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_produce_uses_service_clock() {
        let (service, clock) = service();
        let tp = TopicPartition::new("t", 0);
        clock.set(1_234);
        let entry = service.produce(&tp, 1000, 0, 0).unwrap();
        assert_eq!(entry.last_update_timestamp, 1_234);

        let entry = service.produce_batch(&tp, 1000, 0, 1, 4).unwrap();
        assert_eq!(entry.last_sequence, 4);
        assert_eq!(service.describe_producers(&tp).len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LifecycleConfig::default().with_producer_id_expiration(0, 500);
        assert!(matches!(
            ProducerIdentityService::new(config),
            Err(LifecycleError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_tasks_shutdown() {
        let (service, _) = service();
        let tasks = service.start_background_tasks();
        assert_eq!(tasks.task_count(), 3);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tasks.shutdown_and_wait().await;
    }
}
