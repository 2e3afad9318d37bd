//! Timeout and retry configuration
//!
//! Defaults follow the wire-level constants; the HLink timeouts can be
//! overridden through the environment (`HLINK_HANDSHAKE_TIMEOUT_MS`,
//! `HLINK_READ_TIMEOUT_MS`, `HLINK_WRITE_TIMEOUT_MS`).

use std::time::Duration;
use tracing::warn;

/// Timeouts for one HLink connection
#[derive(Debug, Clone)]
pub struct HlinkConfig {
    /// Timeout for each of the three handshake transfers
    pub handshake_timeout: Duration,
    /// Timeout for the steady-state header and payload reads
    pub read_timeout: Duration,
    /// Timeout for each bulk OUT chunk
    pub write_timeout: Duration,
}

impl Default for HlinkConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(1000),
            read_timeout: Duration::from_millis(10_000),
            write_timeout: Duration::from_millis(1000),
        }
    }
}

impl HlinkConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            handshake_timeout: env_ms("HLINK_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout),
            read_timeout: env_ms("HLINK_READ_TIMEOUT_MS", defaults.read_timeout),
            write_timeout: env_ms("HLINK_WRITE_TIMEOUT_MS", defaults.write_timeout),
        }
    }
}

fn env_ms(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!("Ignoring {}={:?}: not a millisecond count", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Retry policy for `open_device` and serial-string fetches
///
/// Interface claims frequently fail transiently right after hot-plug, so the
/// whole open+claim sequence is retried with a fixed delay.
#[derive(Debug, Clone)]
pub struct OpenRetryPolicy {
    /// Total open+claim attempts (first try included)
    pub claim_attempts: u32,
    /// Fixed delay between claim attempts
    pub claim_retry_delay: Duration,
    /// Attempts for a serial fetch that keeps reporting the device gone
    pub serial_attempts: u32,
    /// Base delay for serial retries, divided by the remaining attempts
    pub serial_retry_delay: Duration,
    /// Attempts to read the active configuration after open
    pub settle_attempts: u32,
    /// Delay between configuration reads while settling
    pub settle_delay: Duration,
}

impl Default for OpenRetryPolicy {
    fn default() -> Self {
        Self {
            claim_attempts: 3,
            claim_retry_delay: Duration::from_millis(500),
            serial_attempts: 3,
            serial_retry_delay: Duration::from_millis(500),
            settle_attempts: 10,
            settle_delay: Duration::from_millis(50),
        }
    }
}

/// Configuration for the whole device service
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Retry policy applied by the registry
    pub open_retry: OpenRetryPolicy,
}
