//! Link configuration
//!
//! Settings for a console session, loadable from a JSON file. Missing keys
//! fall back to the defaults.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_REQUEST_TIMEOUT_MS};

/// Default number of bytes requested per transport read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256;

/// Default time to wait for the read loop to stop on disconnect
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 200;

/// Link client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub endpoint: String,
    pub baud_rate: u32,
    /// How long `send` waits for the matching response
    pub request_timeout_ms: u64,
    pub read_chunk_size: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl LinkConfig {
    /// Config for `endpoint` with every other setting defaulted
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> io::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Write as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }

    fn validate(&self) -> io::Result<()> {
        if self.read_chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "read_chunk_size must be greater than 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}
