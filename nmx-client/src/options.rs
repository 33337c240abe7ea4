//! Transaction options.
//!
//! Options are built in the following order (later overrides earlier):
//! 1. Default values
//! 2. Environment variables, via [`TxOptions::apply_env_overrides`]
//! 3. Builder methods called afterwards, e.g. for command-line flags

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-attempt timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default attempt count.
pub const DEFAULT_TRIES: u32 = 1;

/// Retry policy shared by every attempt of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxOptions {
    /// Maximum number of attempts, at least 1.
    pub tries: u32,
    /// How long one attempt waits for a correlated response.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Pause between a timed-out attempt and the next one. Zero retries
    /// immediately.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: Duration::ZERO,
        }
    }
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt count. Values below 1 are raised to 1.
    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Applies `NMX_TRIES`, `NMX_TIMEOUT_MS` and `NMX_RETRY_DELAY_MS`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(tries) = std::env::var("NMX_TRIES") {
            if let Ok(n) = tries.parse::<u32>() {
                self.tries = n.max(1);
            }
        }

        if let Ok(timeout) = std::env::var("NMX_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(delay) = std::env::var("NMX_RETRY_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.retry_delay = Duration::from_millis(ms);
            }
        }
    }

    /// Validates options that arrived through deserialization.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.tries == 0 {
            return Err(ClientError::Config("tries must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
