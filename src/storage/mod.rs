//! Partition-side producer state
//!
//! Everything a partition leader needs to gate idempotent writes: the
//! per-partition producer state store, its idle expiration sweep, and the
//! producer id allocator.

pub mod expiration;
pub mod producer_id;
pub mod producer_state;

pub use expiration::ProducerStateExpirer;
pub use producer_id::ProducerIdManager;
pub use producer_state::{
    increment_sequence, ProducerEpoch, ProducerId, ProducerStateEntry, ProducerStateManager,
    SequenceNumber,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A topic-partition, the unit producer state is tracked per
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl From<(&str, i32)> for TopicPartition {
    fn from((topic, partition): (&str, i32)) -> Self {
        Self::new(topic, partition)
    }
}
