//! Default constants for the producer lifecycle configuration
//!
//! Values follow the broker defaults for the matching Kafka settings.

/// Idle time after which a producer's partition state is expired (1 day)
/// (`producer.id.expiration.ms`)
pub const DEFAULT_PRODUCER_ID_EXPIRATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Interval between producer state expiration sweeps (10 minutes)
/// (`producer.id.expiration.check.interval.ms`)
pub const DEFAULT_PRODUCER_ID_EXPIRATION_CHECK_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Idle time after which a transactional id is removed (7 days)
/// (`transactional.id.expiration.ms`)
pub const DEFAULT_TRANSACTIONAL_ID_EXPIRATION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Interval between transactional id removal sweeps (1 hour)
/// (`transactions.remove.expired.transactional.id.cleanup.interval.ms`)
pub const DEFAULT_TRANSACTIONAL_ID_EXPIRATION_CHECK_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Interval between timed-out transaction abort sweeps (10 seconds)
/// (`transactions.abort.timed.out.transaction.cleanup.interval.ms`)
pub const DEFAULT_ABORT_TIMED_OUT_TRANSACTION_CHECK_INTERVAL_MS: u64 = 10_000;

/// Largest transaction timeout a client may request (15 minutes)
/// (`transaction.max.timeout.ms`)
pub const DEFAULT_TRANSACTION_MAX_TIMEOUT_MS: i64 = 15 * 60 * 1000;

/// Transaction timeout used when the client does not supply one (1 minute)
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: i64 = 60_000;

/// First producer id handed out (leaves room for special ids)
pub const DEFAULT_FIRST_PRODUCER_ID: u64 = 1000;

/// Whether a timed-out transaction bumps the producer epoch
pub const DEFAULT_FENCE_PRODUCER_ON_TIMEOUT: bool = true;
