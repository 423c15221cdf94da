//! Error types for the producer lifecycle
//!
//! Every rejection is returned synchronously to the caller and maps onto a
//! Kafka protocol error code, so the request layer can translate it without
//! inspecting message strings. Nothing in this crate retries internally.

use thiserror::Error;

mod kafka_error_code;

pub use kafka_error_code::KafkaErrorCode;

use crate::storage::{ProducerEpoch, ProducerId, SequenceNumber, TopicPartition};
use crate::transaction::TransactionState;

/// Result type alias for producer lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Main error type for the producer lifecycle
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(
        "Out of order sequence for producer {producer_id} on {partition}: expected {expected}, got {received}"
    )]
    OutOfOrderSequence {
        partition: TopicPartition,
        producer_id: ProducerId,
        expected: SequenceNumber,
        received: SequenceNumber,
    },

    #[error("Duplicate sequence {sequence} for producer {producer_id} on {partition}")]
    DuplicateSequence {
        partition: TopicPartition,
        producer_id: ProducerId,
        sequence: SequenceNumber,
    },

    #[error("Invalid producer epoch for producer {producer_id}: current {current}, got {received}")]
    InvalidProducerEpoch {
        producer_id: ProducerId,
        current: ProducerEpoch,
        received: ProducerEpoch,
    },

    #[error("Invalid transaction state for {transactional_id}: cannot move from {from} to {to}")]
    InvalidTransactionState {
        transactional_id: String,
        from: TransactionState,
        to: TransactionState,
    },

    #[error("Transactional id not found: {0}")]
    TransactionalIdNotFound(String),

    #[error(
        "Producer id {received} does not match transactional id {transactional_id} (mapped to {expected})"
    )]
    InvalidProducerIdMapping {
        transactional_id: String,
        expected: ProducerId,
        received: ProducerId,
    },

    #[error("Invalid transaction timeout: {timeout_ms}ms (max {max_ms}ms)")]
    InvalidTransactionTimeout { timeout_ms: i64, max_ms: i64 },

    #[error("Concurrent transactions: {0}")]
    ConcurrentTransactions(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Marker write failed: {0}")]
    MarkerWrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl LifecycleError {
    /// Create a configuration error for a specific setting
    pub fn config(setting: &str, reason: impl Into<String>) -> Self {
        LifecycleError::Config(format!("{}: {}", setting, reason.into()))
    }

    /// Create a concurrent-transactions error for a transactional id
    pub fn concurrent(transactional_id: &str, state: TransactionState) -> Self {
        LifecycleError::ConcurrentTransactions(format!(
            "{} has a pending {} transition",
            transactional_id, state
        ))
    }

    /// Convert this error to the corresponding Kafka protocol error code
    pub fn kafka_error_code(&self) -> KafkaErrorCode {
        match self {
            LifecycleError::OutOfOrderSequence { .. } => KafkaErrorCode::OutOfOrderSequenceNumber,
            LifecycleError::DuplicateSequence { .. } => KafkaErrorCode::DuplicateSequenceNumber,
            LifecycleError::InvalidProducerEpoch { .. } => KafkaErrorCode::InvalidProducerEpoch,
            LifecycleError::InvalidTransactionState { .. } => KafkaErrorCode::InvalidTxnState,
            // An expired transactional id surfaces to clients as a stale mapping
            LifecycleError::TransactionalIdNotFound(_) => KafkaErrorCode::InvalidProducerIdMapping,
            LifecycleError::InvalidProducerIdMapping { .. } => {
                KafkaErrorCode::InvalidProducerIdMapping
            }
            LifecycleError::InvalidTransactionTimeout { .. } => {
                KafkaErrorCode::InvalidTransactionTimeout
            }
            LifecycleError::ConcurrentTransactions(_) => KafkaErrorCode::ConcurrentTransactions,
            LifecycleError::InvalidRequest(_) => KafkaErrorCode::InvalidRequest,
            LifecycleError::MarkerWrite(_) => KafkaErrorCode::UnknownServerError,
            LifecycleError::Config(_) | LifecycleError::TomlParse(_) => {
                KafkaErrorCode::InvalidConfig
            }
        }
    }

    /// Returns true if this error is retriable by Kafka clients
    pub fn is_retriable(&self) -> bool {
        self.kafka_error_code().is_retriable()
    }

    /// Returns true if the client must call InitProducerId before retrying
    pub fn requires_reinit(&self) -> bool {
        matches!(
            self,
            LifecycleError::InvalidProducerEpoch { .. }
                | LifecycleError::TransactionalIdNotFound(_)
                | LifecycleError::InvalidProducerIdMapping { .. }
        )
    }
}

impl From<&LifecycleError> for i16 {
    fn from(err: &LifecycleError) -> i16 {
        err.kafka_error_code().as_i16()
    }
}
