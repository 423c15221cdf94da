//! Transaction marker writer
//!
//! Ending a transaction means writing a commit or abort marker to every
//! enlisted partition. The coordinator calls the writer with the transactional
//! id's entry unlocked; the entry sits in a `Prepare*` state meanwhile.

use std::fmt::Debug;

use crate::error::Result;
use crate::storage::{ProducerEpoch, ProducerId, TopicPartition};
use crate::transaction::TransactionResult;

/// Writes transaction markers to the partitions of a finished transaction
pub trait TxnMarkerWriter: Send + Sync + Debug {
    /// Durably record `result` for `producer_id`/`producer_epoch` on every partition
    ///
    /// An error leaves the transaction pending; the coordinator completes it on
    /// a later timeout sweep.
    fn write_markers(
        &self,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        result: TransactionResult,
        partitions: &[TopicPartition],
    ) -> Result<()>;
}

/// Marker writer that accepts everything and writes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMarkerWriter;

impl TxnMarkerWriter for NoopMarkerWriter {
    fn write_markers(
        &self,
        _producer_id: ProducerId,
        _producer_epoch: ProducerEpoch,
        _result: TransactionResult,
        _partitions: &[TopicPartition],
    ) -> Result<()> {
        Ok(())
    }
}
