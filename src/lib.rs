#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # producer-lifecycle
//!
//! Broker-side producer identity and lifecycle management for a Kafka-style
//! transactional log:
//!
//! - **Idempotent writes**: per-partition producer state rejects duplicate,
//!   out-of-order and stale-epoch writes
//! - **Transactions**: transactional ids map to producer id/epoch pairs and
//!   move through an explicit state machine on enlist, commit and abort
//! - **Expiration**: idle producer state, idle transactional ids and
//!   timed-out transactions are each handled by their own periodic sweep
//!
//! ## Quick Start
//!
//! ```
//! use producer_lifecycle::config::LifecycleConfig;
//! use producer_lifecycle::service::ProducerIdentityService;
//! use producer_lifecycle::storage::TopicPartition;
//! use producer_lifecycle::transaction::TransactionResult;
//!
//! fn main() -> producer_lifecycle::Result<()> {
//!     let service = ProducerIdentityService::new(LifecycleConfig::default())?;
//!     let orders = TopicPartition::new("orders", 0);
//!
//!     let (pid, epoch) = service.init_producer_id(Some("checkout"), Some(30_000))?;
//!     service.add_partitions_to_txn("checkout", pid, epoch, &[orders.clone()])?;
//!     service.produce(&orders, pid, epoch, 0)?;
//!     service.end_txn("checkout", pid, epoch, TransactionResult::Commit)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`storage`]: per-partition producer state, its expirer, producer id allocation
//! - [`transaction`]: transaction metadata store, state machine, coordinator, expirer
//! - [`service`]: request-facing façade and background task wiring
//! - [`config`]: configuration and TOML file support
//! - [`clock`]: injectable time source
//! - [`error`]: error types and Kafka error code mapping
//! - [`testing`]: in-memory partition log for tests
//!
//! The per-partition producer state and the transactional-id metadata expire
//! independently. A producer id may keep writing to a partition after its
//! transactional id has been removed; transactional requests for that id fail
//! with [`LifecycleError::TransactionalIdNotFound`] until the client
//! re-initializes.

// Deny .unwrap() in production code; test code is exempt via #[cfg(test)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod clock;
pub mod config;
pub mod error;
pub mod service;
pub mod storage;
pub mod task;
pub mod testing;
pub mod transaction;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigFile, LifecycleConfig};
pub use error::{KafkaErrorCode, LifecycleError, Result};
pub use service::{BackgroundTasks, ProducerIdentityService};
pub use storage::{
    ProducerEpoch, ProducerId, ProducerIdManager, ProducerStateEntry, ProducerStateExpirer,
    ProducerStateManager, SequenceNumber, TopicPartition,
};
pub use transaction::{
    TransactionCoordinator, TransactionExpirer, TransactionFilter, TransactionListing,
    TransactionMetadata, TransactionResult, TransactionState, TxnMarkerWriter,
};
