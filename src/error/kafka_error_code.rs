//! Kafka protocol error codes surfaced by the producer lifecycle

/// Kafka protocol error codes
/// See: <https://kafka.apache.org/protocol.html#protocol_error_codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaErrorCode {
    /// No error
    None = 0,
    /// Unknown server error
    UnknownServerError = -1,
    /// Invalid config
    InvalidConfig = 40,
    /// Invalid request
    InvalidRequest = 42,
    /// Out of order sequence number
    OutOfOrderSequenceNumber = 45,
    /// Duplicate sequence number
    DuplicateSequenceNumber = 46,
    /// Invalid producer epoch
    InvalidProducerEpoch = 47,
    /// Invalid txn state
    InvalidTxnState = 48,
    /// Invalid producer id mapping
    InvalidProducerIdMapping = 49,
    /// Invalid transaction timeout
    InvalidTransactionTimeout = 50,
    /// Concurrent transactions
    ConcurrentTransactions = 51,
}

impl KafkaErrorCode {
    pub fn is_retriable(&self) -> bool {
        matches!(self, KafkaErrorCode::ConcurrentTransactions)
    }

    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Map a wire code back to a known variant
    pub fn from_i16(code: i16) -> Option<Self> {
        let known = match code {
            0 => KafkaErrorCode::None,
            -1 => KafkaErrorCode::UnknownServerError,
            40 => KafkaErrorCode::InvalidConfig,
            42 => KafkaErrorCode::InvalidRequest,
            45 => KafkaErrorCode::OutOfOrderSequenceNumber,
            46 => KafkaErrorCode::DuplicateSequenceNumber,
            47 => KafkaErrorCode::InvalidProducerEpoch,
            48 => KafkaErrorCode::InvalidTxnState,
            49 => KafkaErrorCode::InvalidProducerIdMapping,
            50 => KafkaErrorCode::InvalidTransactionTimeout,
            51 => KafkaErrorCode::ConcurrentTransactions,
            _ => return None,
        };
        Some(known)
    }
}
