//! Testing utilities
//!
//! [`InMemoryPartitionLog`] stands in for the partition log: it stores records
//! and transaction markers per partition and serves read-committed reads, so
//! integration tests can check what a consumer would see after commits and
//! aborts. It also acts as the coordinator's [`TxnMarkerWriter`], with a switch
//! to make marker writes fail.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use producer_lifecycle::config::LifecycleConfig;
//! use producer_lifecycle::clock::ManualClock;
//! use producer_lifecycle::service::ProducerIdentityService;
//! use producer_lifecycle::storage::TopicPartition;
//! use producer_lifecycle::testing::InMemoryPartitionLog;
//! use producer_lifecycle::transaction::TransactionResult;
//!
//! let log = Arc::new(InMemoryPartitionLog::new());
//! let service = ProducerIdentityService::with_components(
//!     LifecycleConfig::default(),
//!     Arc::new(ManualClock::new(0)),
//!     log.clone(),
//! )
//! .unwrap();
//!
//! let tp = TopicPartition::new("orders", 0);
//! let (pid, epoch) = service.init_producer_id(Some("txn"), None).unwrap();
//! service.add_partitions_to_txn("txn", pid, epoch, &[tp.clone()]).unwrap();
//! service.produce(&tp, pid, epoch, 0).unwrap();
//! log.append_transactional(&tp, pid, epoch, b"order-1".to_vec());
//! service.end_txn("txn", pid, epoch, TransactionResult::Commit).unwrap();
//!
//! assert_eq!(log.read_committed(&tp), vec![b"order-1".to_vec()]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{LifecycleError, Result};
use crate::storage::{ProducerEpoch, ProducerId, TopicPartition};
use crate::transaction::{TransactionResult, TxnMarkerWriter};

/// One entry in a partition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Record {
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        transactional: bool,
        value: Vec<u8>,
    },
    Marker {
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        result: TransactionResult,
    },
}

/// Partition logs held in memory
#[derive(Debug, Default)]
pub struct InMemoryPartitionLog {
    partitions: Mutex<HashMap<TopicPartition, Vec<LogEntry>>>,
    fail_markers: AtomicBool,
}

impl InMemoryPartitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a non-transactional record, returning its offset
    pub fn append(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        value: Vec<u8>,
    ) -> i64 {
        self.push(
            partition,
            LogEntry::Record {
                producer_id,
                producer_epoch,
                transactional: false,
                value,
            },
        )
    }

    /// Append a record that belongs to the producer's open transaction
    pub fn append_transactional(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        value: Vec<u8>,
    ) -> i64 {
        self.push(
            partition,
            LogEntry::Record {
                producer_id,
                producer_epoch,
                transactional: true,
                value,
            },
        )
    }

    fn push(&self, partition: &TopicPartition, entry: LogEntry) -> i64 {
        let mut partitions = self.partitions.lock();
        let log = partitions.entry(partition.clone()).or_default();
        log.push(entry);
        (log.len() - 1) as i64
    }

    /// Make every marker write fail until switched back
    pub fn set_fail_markers(&self, fail: bool) {
        self.fail_markers.store(fail, Ordering::SeqCst);
    }

    /// Every entry of a partition, markers included
    pub fn entries(&self, partition: &TopicPartition) -> Vec<LogEntry> {
        self.partitions
            .lock()
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Markers written to a partition, in log order
    pub fn markers(&self, partition: &TopicPartition) -> Vec<(ProducerId, TransactionResult)> {
        self.entries(partition)
            .into_iter()
            .filter_map(|entry| match entry {
                LogEntry::Marker {
                    producer_id, result, ..
                } => Some((producer_id, result)),
                LogEntry::Record { .. } => None,
            })
            .collect()
    }

    /// Values a read-committed consumer would see
    ///
    /// Reading stops at the first transactional record whose outcome is not
    /// yet known; aborted records are skipped.
    pub fn read_committed(&self, partition: &TopicPartition) -> Vec<Vec<u8>> {
        let entries = self.entries(partition);

        // Resolve each transactional record against the first marker after it
        let mut outcome: Vec<Option<TransactionResult>> = vec![None; entries.len()];
        let mut open: HashMap<ProducerId, Vec<usize>> = HashMap::new();
        for (offset, entry) in entries.iter().enumerate() {
            match entry {
                LogEntry::Record {
                    producer_id,
                    transactional: true,
                    ..
                } => open.entry(*producer_id).or_default().push(offset),
                LogEntry::Marker {
                    producer_id,
                    result,
                    ..
                } => {
                    for pending in open.remove(producer_id).unwrap_or_default() {
                        outcome[pending] = Some(*result);
                    }
                }
                LogEntry::Record { .. } => {}
            }
        }
        let undecided: HashSet<usize> = open.into_values().flatten().collect();

        let mut visible = Vec::new();
        for (offset, entry) in entries.into_iter().enumerate() {
            if undecided.contains(&offset) {
                break;
            }
            if let LogEntry::Record {
                transactional,
                value,
                ..
            } = entry
            {
                if !transactional || outcome[offset] == Some(TransactionResult::Commit) {
                    visible.push(value);
                }
            }
        }
        visible
    }
}

impl TxnMarkerWriter for InMemoryPartitionLog {
    fn write_markers(
        &self,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        result: TransactionResult,
        partitions: &[TopicPartition],
    ) -> Result<()> {
        if self.fail_markers.load(Ordering::SeqCst) {
            return Err(LifecycleError::MarkerWrite(format!(
                "{} partitions unavailable",
                partitions.len()
            )));
        }
        for partition in partitions {
            let offset = self.push(
                partition,
                LogEntry::Marker {
                    producer_id,
                    producer_epoch,
                    result,
                },
            );
            debug!(%partition, producer_id, %result, offset, "Wrote transaction marker");
        }
        Ok(())
    }
}

/// Initialize tracing for tests; honours `RUST_LOG`
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
