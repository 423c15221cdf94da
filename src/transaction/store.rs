//! Transaction metadata store
//!
//! Coordinator-side map from transactional id to [`TransactionMetadata`],
//! sharded with `DashMap` so different transactional ids never contend.
//!
//! Entries here and the per-partition producer state evolve independently.
//! Removing a transactional id does not touch the partition state of its
//! producer id, so for a while a producer id can be valid for writes on a
//! partition while its transactional id is already gone. Callers that reach
//! the store with such an id get [`LifecycleError::TransactionalIdNotFound`].

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{TransactionMetadata, TransactionState};
use crate::error::{LifecycleError, Result};
use crate::storage::ProducerId;

/// Filter for [`TransactionMetadataStore::list`]; empty lists match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub states: Vec<TransactionState>,
    pub producer_ids: Vec<ProducerId>,
}

impl TransactionFilter {
    pub fn with_states(mut self, states: impl IntoIterator<Item = TransactionState>) -> Self {
        self.states.extend(states);
        self
    }

    pub fn with_producer_ids(mut self, producer_ids: impl IntoIterator<Item = ProducerId>) -> Self {
        self.producer_ids.extend(producer_ids);
        self
    }

    fn matches(&self, txn: &TransactionMetadata) -> bool {
        (self.states.is_empty() || self.states.contains(&txn.state))
            && (self.producer_ids.is_empty() || self.producer_ids.contains(&txn.producer_id))
    }
}

/// One row of a transaction listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionListing {
    pub transactional_id: String,
    pub producer_id: ProducerId,
    pub state: TransactionState,
}

#[derive(Debug, Default)]
pub struct TransactionMetadataStore {
    transactions: DashMap<String, TransactionMetadata>,
}

impl TransactionMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `transactional_id`, locked for the lifetime of the guard
    pub fn entry(&self, transactional_id: &str) -> Entry<'_, String, TransactionMetadata> {
        self.transactions.entry(transactional_id.to_string())
    }

    /// Locked access to an existing entry
    pub fn get_mut(
        &self,
        transactional_id: &str,
    ) -> Result<RefMut<'_, String, TransactionMetadata>> {
        self.transactions
            .get_mut(transactional_id)
            .ok_or_else(|| LifecycleError::TransactionalIdNotFound(transactional_id.to_string()))
    }

    /// Snapshot of one entry
    pub fn describe(&self, transactional_id: &str) -> Option<TransactionMetadata> {
        self.transactions
            .get(transactional_id)
            .map(|txn| txn.value().clone())
    }

    /// Listing of every entry matching `filter`, ordered by transactional id
    pub fn list(&self, filter: &TransactionFilter) -> Vec<TransactionListing> {
        let mut listings: Vec<TransactionListing> = self
            .transactions
            .iter()
            .filter(|txn| filter.matches(txn.value()))
            .map(|txn| TransactionListing {
                transactional_id: txn.key().clone(),
                producer_id: txn.producer_id,
                state: txn.state,
            })
            .collect();
        listings.sort_by(|a, b| a.transactional_id.cmp(&b.transactional_id));
        listings
    }

    /// Ids of in-progress transactions idle past their own timeout
    pub fn timed_out(&self, now_ms: i64) -> Vec<String> {
        self.transactions
            .iter()
            .filter(|txn| txn.state.is_in_progress() && txn.is_timed_out(now_ms))
            .map(|txn| txn.key().clone())
            .collect()
    }

    /// Delete removable entries idle past `expiration_ms`
    ///
    /// Candidates are collected first and the condition is checked again under
    /// the entry lock, so an entry touched in between survives. Returns the
    /// removed entries.
    pub fn remove_expired(&self, now_ms: i64, expiration_ms: i64) -> Vec<TransactionMetadata> {
        let candidates: Vec<String> = self
            .transactions
            .iter()
            .filter(|txn| txn.state.is_removable() && txn.is_idle(now_ms, expiration_ms))
            .map(|txn| txn.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|transactional_id| {
                self.transactions
                    .remove_if(&transactional_id, |_, txn| {
                        txn.state.is_removable() && txn.is_idle(now_ms, expiration_ms)
                    })
                    .map(|(_, txn)| {
                        debug!(
                            transactional_id = %txn.transactional_id,
                            producer_id = txn.producer_id,
                            state = %txn.state,
                            "Removed expired transactional id"
                        );
                        txn
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
