//! Protocol errors

use thiserror::Error;

use super::commands::Status;

/// Errors surfaced by the link client to callers of `send`
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Not connected to device")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out waiting for device response")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No free request id: every id is in flight")]
    RequestIdsExhausted,
}

/// Errors decoding a packet or a fixed-layout payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload too short: need {needed} bytes, got {available}")]
    TooShort { needed: usize, available: usize },

    #[error("Unknown command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("Unknown status byte {0:#04x}")]
    UnknownStatus(u8),
}

/// A batch listing payload did not hold what its header declared
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("{kind} payload malformed: need {needed} bytes, got {available}")]
    Malformed {
        kind: &'static str,
        needed: usize,
        available: usize,
    },
}

/// Errors from a multi-batch listing fetch
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Malformed(#[from] BatchError),

    #[error("Device returned status {0}")]
    Device(Status),

    #[error("Listing stalled at index {0}")]
    NoProgress(u8),
}
