//! Configuration file support
//!
//! Settings left out of the file fall back to the defaults in
//! `config::defaults`.
//!
//! ## Example Configuration
//!
//! ```toml
//! [producer_state]
//! expiration_ms = 86400000
//! check_interval_ms = 600000
//!
//! [transactions]
//! transactional_id_expiration_ms = 604800000
//! transactional_id_check_interval_ms = 3600000
//! abort_check_interval_ms = 10000
//! max_timeout_ms = 900000
//! default_timeout_ms = 60000
//! first_producer_id = 1000
//! fence_on_timeout = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::LifecycleConfig;
use crate::error::{LifecycleError, Result};

/// Root configuration structure for TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Per-partition producer state settings
    pub producer_state: ProducerStateSection,

    /// Transaction coordinator settings
    pub transactions: TransactionsSection,
}

/// Producer state section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerStateSection {
    /// Idle time before a producer's partition state is expired
    pub expiration_ms: Option<i64>,

    /// Sweep interval
    pub check_interval_ms: Option<u64>,
}

/// Transactions section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionsSection {
    /// Idle time before a completed transactional id is removed
    pub transactional_id_expiration_ms: Option<i64>,

    /// Transactional id removal sweep interval
    pub transactional_id_check_interval_ms: Option<u64>,

    /// Timed-out transaction sweep interval
    pub abort_check_interval_ms: Option<u64>,

    /// Largest timeout a client may request
    pub max_timeout_ms: Option<i64>,

    /// Timeout used when the client does not supply one
    pub default_timeout_ms: Option<i64>,

    /// First producer id handed out
    pub first_producer_id: Option<u64>,

    /// Bump the producer epoch when a transaction times out
    pub fence_on_timeout: Option<bool>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay the file's values on the defaults
    pub fn into_config(self) -> LifecycleConfig {
        let mut config = LifecycleConfig::default();

        macro_rules! apply {
            ($field:ident, $value:expr) => {
                if let Some(val) = $value {
                    config.$field = val;
                }
            };
        }

        apply!(producer_id_expiration_ms, self.producer_state.expiration_ms);
        apply!(
            producer_id_expiration_check_interval_ms,
            self.producer_state.check_interval_ms
        );

        let txn = self.transactions;
        apply!(
            transactional_id_expiration_ms,
            txn.transactional_id_expiration_ms
        );
        apply!(
            transactional_id_expiration_check_interval_ms,
            txn.transactional_id_check_interval_ms
        );
        apply!(
            abort_timed_out_transaction_check_interval_ms,
            txn.abort_check_interval_ms
        );
        apply!(transaction_max_timeout_ms, txn.max_timeout_ms);
        apply!(default_transaction_timeout_ms, txn.default_timeout_ms);
        apply!(first_producer_id, txn.first_producer_id);
        apply!(fence_producer_on_timeout, txn.fence_on_timeout);

        config
    }

    /// Generate an example configuration file
    pub fn generate_example() -> String {
        r#"# Producer lifecycle configuration
# Settings left out fall back to the built-in defaults.

[producer_state]
# Idle time before a producer's per-partition state is expired (1 day)
expiration_ms = 86400000

# How often the producer state sweep runs (10 minutes)
check_interval_ms = 600000

[transactions]
# Idle time before a completed transactional id is removed (7 days)
transactional_id_expiration_ms = 604800000

# How often the transactional id sweep runs (1 hour)
transactional_id_check_interval_ms = 3600000

# How often timed-out transactions are aborted (10 seconds)
abort_check_interval_ms = 10000

# Largest transaction timeout a client may request (15 minutes)
max_timeout_ms = 900000

# Timeout used when the client does not supply one
default_timeout_ms = 60000

first_producer_id = 1000

# Bump the producer epoch when a transaction is aborted on timeout
fence_on_timeout = true
"#
        .to_string()
    }
}
