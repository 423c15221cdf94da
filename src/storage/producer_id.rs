//! Producer id allocation
//!
//! Ids are handed out from a single monotonic counter and never reused, so an
//! expired producer's id can't be claimed by a new producer while stale
//! partition state for it may still exist.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::ProducerId;

/// Allocates unique producer ids
#[derive(Debug)]
pub struct ProducerIdManager {
    next_producer_id: AtomicU64,
}

impl ProducerIdManager {
    pub fn new(first_producer_id: ProducerId) -> Self {
        Self {
            next_producer_id: AtomicU64::new(first_producer_id),
        }
    }

    /// Allocate the next producer id
    pub fn next_producer_id(&self) -> ProducerId {
        let producer_id = self.next_producer_id.fetch_add(1, Ordering::SeqCst);
        debug!(producer_id, "Allocated producer id");
        producer_id
    }

    /// The id the next call to [`next_producer_id`](Self::next_producer_id) returns
    pub fn peek(&self) -> ProducerId {
        self.next_producer_id.load(Ordering::SeqCst)
    }
}
