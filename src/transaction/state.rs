//! Transaction state structures
//!
//! Defines the state machine and the metadata tracked per transactional id.
//! Every state change goes through [`TransactionMetadata::transition_to`], which
//! checks the move against [`TransactionState::valid_previous_states`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::storage::{ProducerEpoch, ProducerId, TopicPartition};

/// Transaction state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// No transaction in progress
    Empty,
    /// Partitions have been enlisted and records may be written
    Ongoing,
    /// Commit requested; markers are being written
    PrepareCommit,
    /// Abort requested; markers are being written
    PrepareAbort,
    /// Transaction has been committed
    CompleteCommit,
    /// Transaction has been aborted
    CompleteAbort,
}

impl TransactionState {
    pub const ALL: [TransactionState; 6] = [
        TransactionState::Empty,
        TransactionState::Ongoing,
        TransactionState::PrepareCommit,
        TransactionState::PrepareAbort,
        TransactionState::CompleteCommit,
        TransactionState::CompleteAbort,
    ];

    /// States from which a transition into `self` is legal
    pub fn valid_previous_states(&self) -> &'static [TransactionState] {
        use TransactionState::*;
        match self {
            Empty => &[Empty, CompleteCommit, CompleteAbort],
            Ongoing => &[Empty, Ongoing],
            PrepareCommit => &[Ongoing],
            PrepareAbort => &[Ongoing],
            CompleteCommit => &[PrepareCommit],
            CompleteAbort => &[PrepareAbort],
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        target.valid_previous_states().contains(self)
    }

    /// Check if this state allows adding partitions (after any reset to Empty)
    pub fn can_add_partitions(&self) -> bool {
        !self.is_preparing()
    }

    /// Check if this is a completed state
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            TransactionState::CompleteCommit | TransactionState::CompleteAbort
        )
    }

    /// Check if this is a preparing state (markers in flight)
    pub fn is_preparing(&self) -> bool {
        matches!(
            self,
            TransactionState::PrepareCommit | TransactionState::PrepareAbort
        )
    }

    /// States the transactional-id sweep may delete
    pub fn is_removable(&self) -> bool {
        matches!(self, TransactionState::Empty) || self.is_complete()
    }

    /// States the abort-timeout sweep watches
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TransactionState::Ongoing) || self.is_preparing()
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Empty => write!(f, "Empty"),
            TransactionState::Ongoing => write!(f, "Ongoing"),
            TransactionState::PrepareCommit => write!(f, "PrepareCommit"),
            TransactionState::PrepareAbort => write!(f, "PrepareAbort"),
            TransactionState::CompleteCommit => write!(f, "CompleteCommit"),
            TransactionState::CompleteAbort => write!(f, "CompleteAbort"),
        }
    }
}

/// Outcome requested by EndTxn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionResult {
    Commit,
    Abort,
}

impl TransactionResult {
    pub fn prepare_state(&self) -> TransactionState {
        match self {
            TransactionResult::Commit => TransactionState::PrepareCommit,
            TransactionResult::Abort => TransactionState::PrepareAbort,
        }
    }

    pub fn complete_state(&self) -> TransactionState {
        match self {
            TransactionResult::Commit => TransactionState::CompleteCommit,
            TransactionResult::Abort => TransactionState::CompleteAbort,
        }
    }

    /// The outcome a Prepare* or Complete* state is heading for
    pub fn of_state(state: TransactionState) -> Option<Self> {
        match state {
            TransactionState::PrepareCommit | TransactionState::CompleteCommit => {
                Some(TransactionResult::Commit)
            }
            TransactionState::PrepareAbort | TransactionState::CompleteAbort => {
                Some(TransactionResult::Abort)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionResult::Commit => write!(f, "commit"),
            TransactionResult::Abort => write!(f, "abort"),
        }
    }
}

/// Coordinator-side record for one transactional id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Transactional ID
    pub transactional_id: String,
    /// Producer ID currently mapped to the transactional id
    pub producer_id: ProducerId,
    /// Producer epoch
    pub producer_epoch: ProducerEpoch,
    /// Current state
    pub state: TransactionState,
    /// Partitions enlisted in the current transaction
    pub partitions: BTreeSet<TopicPartition>,
    /// Last time the entry changed (unix ms)
    pub last_update_timestamp: i64,
    /// Time the current transaction went Ongoing (unix ms)
    pub transaction_start_timestamp: Option<i64>,
    /// Transaction timeout in milliseconds
    pub transaction_timeout_ms: i64,
    /// Producer id that takes over at epoch 0 once the pending abort completes
    #[serde(default)]
    pub next_producer_id: Option<ProducerId>,
}

impl TransactionMetadata {
    /// A fresh entry in `Empty`
    pub fn new(
        transactional_id: impl Into<String>,
        producer_id: ProducerId,
        producer_epoch: ProducerEpoch,
        transaction_timeout_ms: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            transactional_id: transactional_id.into(),
            producer_id,
            producer_epoch,
            state: TransactionState::Empty,
            partitions: BTreeSet::new(),
            last_update_timestamp: now_ms,
            transaction_start_timestamp: None,
            transaction_timeout_ms,
            next_producer_id: None,
        }
    }

    /// Fence the current producer instance
    ///
    /// Bumps the epoch, or when the epoch is exhausted returns true and leaves
    /// the epoch alone; the caller then allocates a new producer id.
    pub fn bump_epoch(&mut self) -> bool {
        if self.producer_epoch >= ProducerEpoch::MAX - 1 {
            return true;
        }
        self.producer_epoch += 1;
        false
    }

    /// Move to `target`, or fail without changing anything
    pub fn transition_to(&mut self, target: TransactionState, now_ms: i64) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(LifecycleError::InvalidTransactionState {
                transactional_id: self.transactional_id.clone(),
                from: self.state,
                to: target,
            });
        }

        match target {
            TransactionState::Empty => {
                self.partitions.clear();
                self.transaction_start_timestamp = None;
            }
            TransactionState::Ongoing => {
                if self.state == TransactionState::Empty {
                    self.transaction_start_timestamp = Some(now_ms);
                }
            }
            TransactionState::CompleteCommit | TransactionState::CompleteAbort => {
                self.partitions.clear();
                self.transaction_start_timestamp = None;
                if let Some(next) = self.next_producer_id.take() {
                    self.producer_id = next;
                    self.producer_epoch = 0;
                }
            }
            TransactionState::PrepareCommit | TransactionState::PrepareAbort => {}
        }

        self.state = target;
        self.last_update_timestamp = now_ms;
        Ok(())
    }

    /// True once the entry has been idle past its transaction timeout
    pub fn is_timed_out(&self, now_ms: i64) -> bool {
        now_ms - self.last_update_timestamp > self.transaction_timeout_ms
    }

    /// True once the entry has been idle past `expiration_ms`
    pub fn is_idle(&self, now_ms: i64, expiration_ms: i64) -> bool {
        now_ms - self.last_update_timestamp > expiration_ms
    }

    /// Check the caller's producer id and epoch against the mapping
    pub fn check_producer(&self, producer_id: ProducerId, producer_epoch: ProducerEpoch) -> Result<()> {
        if producer_id != self.producer_id {
            return Err(LifecycleError::InvalidProducerIdMapping {
                transactional_id: self.transactional_id.clone(),
                expected: self.producer_id,
                received: producer_id,
            });
        }
        if producer_epoch != self.producer_epoch {
            return Err(LifecycleError::InvalidProducerEpoch {
                producer_id,
                current: self.producer_epoch,
                received: producer_epoch,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> TransactionMetadata {
        TransactionMetadata::new("txn-1", 1000, 0, 60_000, 0)
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        use TransactionState::*;
        let legal = [
            (Empty, Empty),
            (CompleteCommit, Empty),
            (CompleteAbort, Empty),
            (Empty, Ongoing),
            (Ongoing, Ongoing),
            (Ongoing, PrepareCommit),
            (Ongoing, PrepareAbort),
            (PrepareCommit, CompleteCommit),
            (PrepareAbort, CompleteAbort),
        ];

        for from in TransactionState::ALL {
            for to in TransactionState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_full_commit_cycle() {
        let mut txn = metadata();
        txn.partitions.insert(TopicPartition::new("t", 0));
        txn.transition_to(TransactionState::Ongoing, 10).unwrap();
        assert_eq!(txn.transaction_start_timestamp, Some(10));

        txn.transition_to(TransactionState::Ongoing, 20).unwrap();
        assert_eq!(txn.transaction_start_timestamp, Some(10));
        assert_eq!(txn.last_update_timestamp, 20);

        txn.transition_to(TransactionState::PrepareCommit, 30).unwrap();
        assert_eq!(txn.partitions.len(), 1);
        txn.transition_to(TransactionState::CompleteCommit, 40).unwrap();
        assert!(txn.partitions.is_empty());
        assert_eq!(txn.transaction_start_timestamp, None);

        txn.transition_to(TransactionState::Empty, 50).unwrap();
        assert_eq!(txn.state, TransactionState::Empty);
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut txn = metadata();
        let err = txn
            .transition_to(TransactionState::PrepareCommit, 10)
            .unwrap_err();
        match err {
            LifecycleError::InvalidTransactionState { from, to, .. } => {
                assert_eq!(from, TransactionState::Empty);
                assert_eq!(to, TransactionState::PrepareCommit);
            }
            other => panic!("Expected InvalidTransactionState, got {:?}", other),
        }
        assert_eq!(txn.state, TransactionState::Empty);
        assert_eq!(txn.last_update_timestamp, 0);
    }

    #[test]
    fn test_state_predicates() {
        assert!(TransactionState::Empty.is_removable());
        assert!(TransactionState::CompleteAbort.is_removable());
        assert!(!TransactionState::Ongoing.is_removable());
        assert!(!TransactionState::PrepareCommit.is_removable());

        assert!(TransactionState::Ongoing.is_in_progress());
        assert!(TransactionState::PrepareAbort.is_in_progress());
        assert!(!TransactionState::CompleteCommit.is_in_progress());

        assert!(TransactionState::CompleteCommit.can_add_partitions());
        assert!(!TransactionState::PrepareAbort.can_add_partitions());
    }

    #[test]
    fn test_result_states() {
        let commit = TransactionResult::Commit;
        assert_eq!(commit.prepare_state(), TransactionState::PrepareCommit);
        assert_eq!(commit.complete_state(), TransactionState::CompleteCommit);
        assert_eq!(
            TransactionResult::of_state(TransactionState::PrepareAbort),
            Some(TransactionResult::Abort)
        );
        assert_eq!(TransactionResult::of_state(TransactionState::Ongoing), None);
    }

    #[test]
    fn test_bump_epoch_stops_before_max() {
        let mut txn = metadata();
        assert!(!txn.bump_epoch());
        assert_eq!(txn.producer_epoch, 1);

        txn.producer_epoch = ProducerEpoch::MAX - 2;
        assert!(!txn.bump_epoch());
        assert_eq!(txn.producer_epoch, ProducerEpoch::MAX - 1);

        assert!(txn.bump_epoch());
        assert_eq!(txn.producer_epoch, ProducerEpoch::MAX - 1);
    }

    #[test]
    fn test_completion_hands_over_to_next_producer_id() {
        let mut txn = metadata();
        txn.producer_epoch = ProducerEpoch::MAX - 1;
        txn.partitions.insert(TopicPartition::new("t", 0));
        txn.transition_to(TransactionState::Ongoing, 10).unwrap();
        txn.next_producer_id = Some(2000);

        txn.transition_to(TransactionState::PrepareAbort, 20).unwrap();
        assert_eq!(txn.producer_id, 1000);
        assert_eq!(txn.producer_epoch, ProducerEpoch::MAX - 1);

        txn.transition_to(TransactionState::CompleteAbort, 30).unwrap();
        assert_eq!(txn.producer_id, 2000);
        assert_eq!(txn.producer_epoch, 0);
        assert_eq!(txn.next_producer_id, None);
    }

    #[test]
    fn test_check_producer() {
        let txn = metadata();
        assert!(txn.check_producer(1000, 0).is_ok());
        assert!(matches!(
            txn.check_producer(1001, 0),
            Err(LifecycleError::InvalidProducerIdMapping { .. })
        ));
        assert!(matches!(
            txn.check_producer(1000, 1),
            Err(LifecycleError::InvalidProducerEpoch { .. })
        ));
    }

    #[test]
    fn test_timeouts() {
        let txn = metadata();
        assert!(!txn.is_timed_out(60_000));
        assert!(txn.is_timed_out(60_001));
        assert!(!txn.is_idle(500, 500));
        assert!(txn.is_idle(501, 500));
    }
}
