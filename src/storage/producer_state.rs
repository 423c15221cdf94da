//! Producer state management for idempotent producers
//!
//! This module tracks producer state (producer ID, epoch, sequence numbers)
//! per partition so that duplicate or out-of-order writes are rejected before
//! they reach the log.
//!
//! # Concurrency
//!
//! The store is a two-level `DashMap`: partition → producer id → entry.
//!
//! - A write takes a read guard on the partition's outer shard and the write
//!   guard of its own producer's inner shard, so validation and update of one
//!   producer's stream form a single critical section while other producers
//!   (and other partitions) proceed in parallel.
//! - The expiration sweep walks partitions one at a time and removes idle
//!   producers with the inner shard locked, then drops partitions left empty.
//!   Both paths take the outer guard before an inner one.
//!
//! # Independence from transactional ids
//!
//! Entries here are expired on their own idle timer. They are never consulted
//! or removed because of transactional-id state, and removing one never
//! notifies the transaction coordinator.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TopicPartition;
use crate::error::{LifecycleError, Result};

/// Producer ID type
pub type ProducerId = u64;

/// Producer epoch type (matches Kafka's short type)
pub type ProducerEpoch = i16;

/// Sequence number type (matches Kafka's int type)
pub type SequenceNumber = i32;

type PartitionProducers = DashMap<ProducerId, ProducerStateEntry>;

/// Advance a sequence number, wrapping to 0 after `i32::MAX`
pub fn increment_sequence(sequence: SequenceNumber, increment: i32) -> SequenceNumber {
    if sequence > i32::MAX - increment {
        increment - (i32::MAX - sequence) - 1
    } else {
        sequence + increment
    }
}

/// One producer's write stream to one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStateEntry {
    /// The producer ID
    pub producer_id: ProducerId,
    /// The producer epoch of the last accepted write
    pub producer_epoch: ProducerEpoch,
    /// First sequence of the last accepted batch
    pub first_sequence: SequenceNumber,
    /// Last sequence of the last accepted batch
    pub last_sequence: SequenceNumber,
    /// Time of the last accepted write (unix ms)
    pub last_update_timestamp: i64,
}

impl ProducerStateEntry {
    fn new(
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        first_sequence: SequenceNumber,
        last_sequence: SequenceNumber,
        timestamp: i64,
    ) -> Self {
        Self {
            producer_id,
            producer_epoch,
            first_sequence,
            last_sequence,
            last_update_timestamp: timestamp,
        }
    }

    /// The sequence the next write at the current epoch must start with
    pub fn next_sequence(&self) -> SequenceNumber {
        increment_sequence(self.last_sequence, 1)
    }

    /// True when the entry has been idle for longer than `expiration_ms`
    pub fn is_expired(&self, now_ms: i64, expiration_ms: i64) -> bool {
        now_ms - self.last_update_timestamp > expiration_ms
    }

    /// True when `sequence` lies in the last accepted `first..=last` range
    fn covers(&self, sequence: SequenceNumber) -> bool {
        if self.first_sequence <= self.last_sequence {
            (self.first_sequence..=self.last_sequence).contains(&sequence)
        } else {
            sequence >= self.first_sequence || sequence <= self.last_sequence
        }
    }

    fn check(
        &self,
        partition: &TopicPartition,
        producer_epoch: ProducerEpoch,
        first_sequence: SequenceNumber,
        last_sequence: SequenceNumber,
    ) -> Result<()> {
        if producer_epoch < self.producer_epoch {
            return Err(LifecycleError::InvalidProducerEpoch {
                producer_id: self.producer_id,
                current: self.producer_epoch,
                received: producer_epoch,
            });
        }

        // A higher epoch fences the old stream; the new one must start at 0
        if producer_epoch > self.producer_epoch {
            if first_sequence != 0 {
                return Err(LifecycleError::OutOfOrderSequence {
                    partition: partition.clone(),
                    producer_id: self.producer_id,
                    expected: 0,
                    received: first_sequence,
                });
            }
            return Ok(());
        }

        // Any retry overlapping the last accepted batch was already applied
        if last_sequence == self.last_sequence || self.covers(first_sequence) {
            return Err(LifecycleError::DuplicateSequence {
                partition: partition.clone(),
                producer_id: self.producer_id,
                sequence: first_sequence,
            });
        }

        let expected = self.next_sequence();
        if first_sequence != expected {
            return Err(LifecycleError::OutOfOrderSequence {
                partition: partition.clone(),
                producer_id: self.producer_id,
                expected,
                received: first_sequence,
            });
        }

        Ok(())
    }

    fn apply(
        &mut self,
        producer_epoch: ProducerEpoch,
        first_sequence: SequenceNumber,
        last_sequence: SequenceNumber,
        timestamp: i64,
    ) {
        self.producer_epoch = producer_epoch;
        self.first_sequence = first_sequence;
        self.last_sequence = last_sequence;
        self.last_update_timestamp = timestamp;
    }
}

/// Per-partition producer state for idempotent producers
#[derive(Debug, Default)]
pub struct ProducerStateManager {
    /// (topic, partition) -> (producer_id -> entry)
    partitions: DashMap<TopicPartition, PartitionProducers>,
}

impl ProducerStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record a single-record write
    ///
    /// Accepts when the producer has no state on the partition, when the epoch
    /// is newer and the sequence restarts at 0, or when the epoch matches and
    /// the sequence is the next expected one. The accepted entry is returned.
    pub fn record_write(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        sequence: SequenceNumber,
        timestamp: i64,
    ) -> Result<ProducerStateEntry> {
        self.record_batch(partition, producer_id, producer_epoch, sequence, 1, timestamp)
    }

    /// Validate and record a batch covering `record_count` sequences starting
    /// at `first_sequence`
    pub fn record_batch(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        first_sequence: SequenceNumber,
        record_count: i32,
        timestamp: i64,
    ) -> Result<ProducerStateEntry> {
        if first_sequence < 0 {
            return Err(LifecycleError::InvalidRequest(format!(
                "negative sequence {} from producer {}",
                first_sequence, producer_id
            )));
        }
        if producer_epoch < 0 {
            return Err(LifecycleError::InvalidRequest(format!(
                "negative epoch {} from producer {}",
                producer_epoch, producer_id
            )));
        }
        if record_count < 1 {
            return Err(LifecycleError::InvalidRequest(format!(
                "empty batch from producer {}",
                producer_id
            )));
        }
        let last_sequence = increment_sequence(first_sequence, record_count - 1);

        let producers = self.partition_producers(partition);
        let accepted = match producers.entry(producer_id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.check(partition, producer_epoch, first_sequence, last_sequence)?;
                entry.apply(producer_epoch, first_sequence, last_sequence, timestamp);
                entry.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(ProducerStateEntry::new(
                    producer_id,
                    producer_epoch,
                    first_sequence,
                    last_sequence,
                    timestamp,
                ))
                .value()
                .clone(),
        };

        debug!(
            %partition,
            producer_id,
            producer_epoch,
            first_sequence,
            last_sequence,
            "Recorded write for sequence tracking"
        );

        Ok(accepted)
    }

    /// Snapshot of every live producer on a partition, ordered by producer id
    pub fn describe(&self, partition: &TopicPartition) -> Vec<ProducerStateEntry> {
        let mut entries: Vec<ProducerStateEntry> = self
            .partitions
            .get(partition)
            .map(|producers| producers.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.producer_id);
        entries
    }

    /// Current state of one producer on one partition
    pub fn get(
        &self,
        partition: &TopicPartition,
        producer_id: ProducerId,
    ) -> Option<ProducerStateEntry> {
        self.partitions
            .get(partition)
            .and_then(|producers| producers.get(&producer_id).map(|e| e.value().clone()))
    }

    /// Remove every entry idle for longer than `expiration_ms`
    ///
    /// Returns the number of entries removed.
    pub fn remove_expired_producers(&self, now_ms: i64, expiration_ms: i64) -> usize {
        let mut removed = 0;

        for partition in self.partitions.iter() {
            partition.value().retain(|producer_id, entry| {
                let keep = !entry.is_expired(now_ms, expiration_ms);
                if !keep {
                    debug!(
                        partition = %partition.key(),
                        producer_id = *producer_id,
                        producer_epoch = entry.producer_epoch,
                        idle_ms = now_ms - entry.last_update_timestamp,
                        "Expiring idle producer state"
                    );
                    removed += 1;
                }
                keep
            });
        }

        self.partitions.retain(|_, producers| !producers.is_empty());
        removed
    }

    /// Total number of tracked (partition, producer) entries
    pub fn producer_count(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Number of partitions with at least one tracked producer
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Inner map for a partition, created on first use. The returned guard
    /// keeps the sweep from dropping the partition while a write is in flight.
    fn partition_producers(&self, partition: &TopicPartition) -> Ref<'_, TopicPartition, PartitionProducers> {
        if let Some(producers) = self.partitions.get(partition) {
            return producers;
        }
        self.partitions
            .entry(partition.clone())
            .or_default()
            .downgrade()
    }
}
