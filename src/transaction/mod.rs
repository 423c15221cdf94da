//! Transaction coordination for transactional producers
//!
//! This module maps transactional ids to producer id/epoch pairs and drives
//! the transaction state machine:
//!
//! - InitProducerId - assign or re-assign a producer id, fencing older instances
//! - AddPartitionsToTxn - enlist partitions in the transaction
//! - EndTxn - commit or abort the transaction
//! - Timeout abort and transactional-id expiration sweeps
//!
//! Transactional-id metadata and per-partition producer state
//! ([`crate::storage::ProducerStateManager`]) expire independently.

mod coordinator;
pub mod expiration;
pub mod markers;
mod state;
pub mod store;

pub use coordinator::{TransactionCoordinator, TransactionStats};
pub use expiration::TransactionExpirer;
pub use markers::{NoopMarkerWriter, TxnMarkerWriter};
pub use state::{TransactionMetadata, TransactionResult, TransactionState};
pub use store::{TransactionFilter, TransactionListing, TransactionMetadataStore};
