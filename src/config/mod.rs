//! Configuration for the producer lifecycle
//!
//! This module is organized into submodules:
//! - `defaults` - Default constants and values
//! - `file` - TOML configuration file support
//!
//! The configuration only carries values: how often each sweep runs and how
//! long producer ids, transactional ids, and open transactions may sit idle.

mod defaults;
pub mod file;

pub use defaults::*;
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LifecycleError, Result};

/// Complete configuration for the producer lifecycle.
///
/// # Example
///
/// ```
/// use producer_lifecycle::config::LifecycleConfig;
///
/// let config = LifecycleConfig::default()
///     .with_producer_id_expiration(2_000, 500)
///     .with_transactional_id_expiration(500, 500);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Idle time after which a producer's partition state is expired
    pub producer_id_expiration_ms: i64,

    /// Interval between producer state expiration sweeps
    pub producer_id_expiration_check_interval_ms: u64,

    /// Idle time after which a completed transactional id is removed
    pub transactional_id_expiration_ms: i64,

    /// Interval between transactional id removal sweeps
    pub transactional_id_expiration_check_interval_ms: u64,

    /// Interval between timed-out transaction abort sweeps
    pub abort_timed_out_transaction_check_interval_ms: u64,

    /// Largest transaction timeout a client may request
    pub transaction_max_timeout_ms: i64,

    /// Transaction timeout used when the client does not supply one
    pub default_transaction_timeout_ms: i64,

    /// First producer id handed out by the allocator
    pub first_producer_id: u64,

    /// Bump the producer epoch when a transaction is aborted on timeout
    pub fence_producer_on_timeout: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            producer_id_expiration_ms: DEFAULT_PRODUCER_ID_EXPIRATION_MS,
            producer_id_expiration_check_interval_ms:
                DEFAULT_PRODUCER_ID_EXPIRATION_CHECK_INTERVAL_MS,
            transactional_id_expiration_ms: DEFAULT_TRANSACTIONAL_ID_EXPIRATION_MS,
            transactional_id_expiration_check_interval_ms:
                DEFAULT_TRANSACTIONAL_ID_EXPIRATION_CHECK_INTERVAL_MS,
            abort_timed_out_transaction_check_interval_ms:
                DEFAULT_ABORT_TIMED_OUT_TRANSACTION_CHECK_INTERVAL_MS,
            transaction_max_timeout_ms: DEFAULT_TRANSACTION_MAX_TIMEOUT_MS,
            default_transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            first_producer_id: DEFAULT_FIRST_PRODUCER_ID,
            fence_producer_on_timeout: DEFAULT_FENCE_PRODUCER_ON_TIMEOUT,
        }
    }
}

impl LifecycleConfig {
    /// Set producer state idle expiration and its sweep interval
    pub fn with_producer_id_expiration(mut self, expiration_ms: i64, check_interval_ms: u64) -> Self {
        self.producer_id_expiration_ms = expiration_ms;
        self.producer_id_expiration_check_interval_ms = check_interval_ms;
        self
    }

    /// Set transactional id idle expiration and its sweep interval
    pub fn with_transactional_id_expiration(
        mut self,
        expiration_ms: i64,
        check_interval_ms: u64,
    ) -> Self {
        self.transactional_id_expiration_ms = expiration_ms;
        self.transactional_id_expiration_check_interval_ms = check_interval_ms;
        self
    }

    /// Set the timed-out transaction sweep interval
    pub fn with_abort_check_interval(mut self, check_interval_ms: u64) -> Self {
        self.abort_timed_out_transaction_check_interval_ms = check_interval_ms;
        self
    }

    /// Set the maximum transaction timeout
    pub fn with_transaction_max_timeout(mut self, max_timeout_ms: i64) -> Self {
        self.transaction_max_timeout_ms = max_timeout_ms;
        self
    }

    /// Set the first producer id
    pub fn with_first_producer_id(mut self, first_producer_id: u64) -> Self {
        self.first_producer_id = first_producer_id;
        self
    }

    /// Enable or disable epoch fencing on transaction timeout
    pub fn with_fence_on_timeout(mut self, enabled: bool) -> Self {
        self.fence_producer_on_timeout = enabled;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config = ConfigFile::load(path)?.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Check that every duration is usable
    pub fn validate(&self) -> Result<()> {
        if self.producer_id_expiration_ms <= 0 {
            return Err(LifecycleError::config(
                "producer_id_expiration_ms",
                "must be positive",
            ));
        }
        if self.transactional_id_expiration_ms <= 0 {
            return Err(LifecycleError::config(
                "transactional_id_expiration_ms",
                "must be positive",
            ));
        }
        let intervals = [
            (
                "producer_id_expiration_check_interval_ms",
                self.producer_id_expiration_check_interval_ms,
            ),
            (
                "transactional_id_expiration_check_interval_ms",
                self.transactional_id_expiration_check_interval_ms,
            ),
            (
                "abort_timed_out_transaction_check_interval_ms",
                self.abort_timed_out_transaction_check_interval_ms,
            ),
        ];
        for (setting, value) in intervals {
            if value == 0 {
                return Err(LifecycleError::config(setting, "must be positive"));
            }
        }
        if self.transaction_max_timeout_ms <= 0 {
            return Err(LifecycleError::config(
                "transaction_max_timeout_ms",
                "must be positive",
            ));
        }
        if self.default_transaction_timeout_ms <= 0
            || self.default_transaction_timeout_ms > self.transaction_max_timeout_ms
        {
            return Err(LifecycleError::config(
                "default_transaction_timeout_ms",
                format!(
                    "must be in 1..={} (transaction_max_timeout_ms)",
                    self.transaction_max_timeout_ms
                ),
            ));
        }
        Ok(())
    }

    pub fn producer_id_expiration_check_interval(&self) -> Duration {
        Duration::from_millis(self.producer_id_expiration_check_interval_ms)
    }

    pub fn transactional_id_expiration_check_interval(&self) -> Duration {
        Duration::from_millis(self.transactional_id_expiration_check_interval_ms)
    }

    pub fn abort_timed_out_transaction_check_interval(&self) -> Duration {
        Duration::from_millis(self.abort_timed_out_transaction_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.producer_id_expiration_ms, 86_400_000);
        assert_eq!(config.producer_id_expiration_check_interval_ms, 600_000);
        assert_eq!(config.transactional_id_expiration_ms, 604_800_000);
        assert_eq!(config.transactional_id_expiration_check_interval_ms, 3_600_000);
        assert_eq!(config.abort_timed_out_transaction_check_interval_ms, 10_000);
        assert_eq!(config.transaction_max_timeout_ms, 900_000);
        assert_eq!(config.first_producer_id, 1000);
        assert!(config.fence_producer_on_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = LifecycleConfig::default()
            .with_producer_id_expiration(2_000, 500)
            .with_transactional_id_expiration(500, 500)
            .with_abort_check_interval(100)
            .with_first_producer_id(5)
            .with_fence_on_timeout(false);

        assert_eq!(config.producer_id_expiration_ms, 2_000);
        assert_eq!(config.producer_id_expiration_check_interval(), Duration::from_millis(500));
        assert_eq!(config.transactional_id_expiration_ms, 500);
        assert_eq!(
            config.abort_timed_out_transaction_check_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(config.first_producer_id, 5);
        assert!(!config.fence_producer_on_timeout);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = LifecycleConfig::default().with_producer_id_expiration(2_000, 0);
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("producer_id_expiration_check_interval_ms"));
    }

    #[test]
    fn test_validate_rejects_default_timeout_above_max() {
        let config = LifecycleConfig::default().with_transaction_max_timeout(1_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let config = LifecycleConfig::default().with_producer_id_expiration(2_000, 500);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: LifecycleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
