//! Timeout configuration shared by [`Client`](crate::Client) and
//! [`Server`](crate::Server).

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};

/// Bound on connect, send, the first receive of each step, and the
/// server's wait for a connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a receive step waits for more bytes once data has started
/// arriving.
pub const DEFAULT_QUIET: Duration = Duration::from_millis(10);

/// Timeout settings.
///
/// Serialized as milliseconds so it can be kept in a JSON file:
///
/// ```
/// let cfg: lipc::Config = serde_json::from_str(r#"{ "timeout_ms": 500 }"#).unwrap();
/// assert_eq!(cfg.timeout(), std::time::Duration::from_millis(500));
/// assert_eq!(cfg.quiet(), lipc::DEFAULT_QUIET);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Step timeout in milliseconds.
    pub timeout_ms: u64,
    /// Quiescence window in milliseconds. Zero only checks for bytes that
    /// already arrived.
    pub quiet_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: millis(DEFAULT_TIMEOUT),
            quiet_ms: millis(DEFAULT_QUIET),
        }
    }
}

impl Config {
    /// Sets the step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    /// Sets the quiescence window.
    #[must_use]
    pub fn with_quiet(mut self, quiet: Duration) -> Self {
        self.quiet_ms = millis(quiet);
        self
    }

    /// Step timeout. Never zero: a zero socket timeout means "block
    /// forever" to the OS.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(if self.timeout_ms == 0 { 1 } else { self.timeout_ms })
    }

    /// Quiescence window.
    pub const fn quiet(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }

    /// Loads a configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Whole milliseconds in `d`, saturating.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
